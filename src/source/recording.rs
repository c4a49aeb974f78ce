//! Recorded step readings
//!
//! Recordings are NDJSON (one snapshot per line) or a JSON array of
//! snapshots. `RecordedSource` plays one back against a clock: only readings
//! at or before the clock's current time are visible.

use super::fault::FaultPlan;
use super::StepSource;
use crate::clock::Clock;
use crate::error::{SensorError, StepsError};
use crate::types::{SensorHandle, SourceKind, StepSnapshot};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Parser for recording files
pub struct RecordingAdapter;

impl RecordingAdapter {
    /// Parse a JSON string containing an array of snapshots
    pub fn parse_array(json: &str) -> Result<Vec<StepSnapshot>, StepsError> {
        let snapshots: Vec<StepSnapshot> = serde_json::from_str(json)?;
        Ok(snapshots)
    }

    /// Parse NDJSON (newline-delimited JSON) containing snapshots
    pub fn parse_ndjson(ndjson: &str) -> Result<Vec<StepSnapshot>, StepsError> {
        let mut snapshots = Vec::new();
        for (line_num, line) in ndjson.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<StepSnapshot>(trimmed) {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => {
                    return Err(StepsError::ParseError(format!(
                        "Failed to parse line {}: {}",
                        line_num + 1,
                        e
                    )));
                }
            }
        }
        Ok(snapshots)
    }

    /// Parse either format, picked by the first non-blank character
    pub fn parse(input: &str) -> Result<Vec<StepSnapshot>, StepsError> {
        if input.trim_start().starts_with('[') {
            Self::parse_array(input)
        } else {
            Self::parse_ndjson(input)
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Vec<StepSnapshot>, StepsError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Check ordering and find counter regressions
    pub fn validate(snapshots: &[StepSnapshot]) -> RecordingReport {
        let mut report = RecordingReport {
            total: snapshots.len(),
            out_of_order: Vec::new(),
            resets: Vec::new(),
            first: snapshots.first().map(|s| s.timestamp),
            last: snapshots.last().map(|s| s.timestamp),
        };

        for (idx, pair) in snapshots.windows(2).enumerate() {
            let (prev, next) = (&pair[0], &pair[1]);
            if next.timestamp < prev.timestamp {
                report.out_of_order.push(idx + 1);
            }
            if next.walking < prev.walking
                || next.running < prev.running
                || next.unknown < prev.unknown
            {
                report.resets.push(idx + 1);
            }
        }
        report
    }
}

/// Summary of a recording's shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordingReport {
    pub total: usize,
    /// Indices whose timestamp is earlier than the previous reading
    pub out_of_order: Vec<usize>,
    /// Indices where a counter went backwards (session reset)
    pub resets: Vec<usize>,
    pub first: Option<DateTime<Utc>>,
    pub last: Option<DateTime<Utc>>,
}

impl RecordingReport {
    pub fn is_ordered(&self) -> bool {
        self.out_of_order.is_empty()
    }
}

/// Playback of a recording as a step source
pub struct RecordedSource {
    snapshots: Vec<StepSnapshot>,
    clock: Arc<dyn Clock>,
    session_active: AtomicBool,
    faults: FaultPlan,
}

impl RecordedSource {
    pub fn new(mut snapshots: Vec<StepSnapshot>, clock: Arc<dyn Clock>) -> Self {
        snapshots.sort_by_key(|s| s.timestamp);
        Self {
            snapshots,
            clock,
            session_active: AtomicBool::new(false),
            faults: FaultPlan::default(),
        }
    }

    /// Shift every reading so the first one lands at `start`
    pub fn replay_from(mut self, start: DateTime<Utc>) -> Self {
        if let Some(first) = self.snapshots.first() {
            let shift = start - first.timestamp;
            for snapshot in &mut self.snapshots {
                snapshot.timestamp += shift;
            }
        }
        self
    }

    pub fn snapshots(&self) -> &[StepSnapshot] {
        &self.snapshots
    }

    pub fn faults(&self) -> &FaultPlan {
        &self.faults
    }

    fn check_readable(&self, operation: &str) -> Result<(), SensorError> {
        self.faults.check(operation)?;
        if !self.session_active.load(Ordering::SeqCst) {
            return Err(SensorError::deactivated("playback session is not active"));
        }
        Ok(())
    }
}

#[async_trait]
impl StepSource for RecordedSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Recording
    }

    async fn is_supported(&self) -> bool {
        true
    }

    async fn get_default(&self) -> Result<SensorHandle, SensorError> {
        Ok(SensorHandle::new(SourceKind::Recording))
    }

    async fn activate(&self, _handle: &SensorHandle) -> Result<(), SensorError> {
        self.session_active.store(true, Ordering::SeqCst);
        tracing::debug!(readings = self.snapshots.len(), "recording playback active");
        Ok(())
    }

    async fn deactivate(&self, _handle: &SensorHandle) {
        self.session_active.store(false, Ordering::SeqCst);
    }

    async fn current_reading(&self, _handle: &SensorHandle) -> Result<StepSnapshot, SensorError> {
        self.check_readable("current_reading")?;

        let now = self.clock.now();
        let latest = self
            .snapshots
            .iter()
            .take_while(|s| s.timestamp <= now)
            .last()
            .copied();
        Ok(latest.unwrap_or_else(|| StepSnapshot::new(now, 0, 0)))
    }

    async fn reading_history(
        &self,
        _handle: &SensorHandle,
        start: DateTime<Utc>,
        duration: Duration,
    ) -> Result<Vec<StepSnapshot>, SensorError> {
        self.check_readable("reading_history")?;

        let end = start + duration;
        let now = self.clock.now();
        Ok(self
            .snapshots
            .iter()
            .filter(|s| s.timestamp >= start && s.timestamp < end && s.timestamp <= now)
            .copied()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    const SAMPLE: &str = r#"
{"timestamp":"2024-01-15T00:00:00Z","walking":0,"running":0}
{"timestamp":"2024-01-15T00:30:00Z","walking":40,"running":10}

{"timestamp":"2024-01-15T01:30:00Z","walking":100,"running":20,"unknown":3}
"#;

    #[test]
    fn test_parse_ndjson_skips_blank_lines() {
        let snapshots = RecordingAdapter::parse_ndjson(SAMPLE).unwrap();

        assert_eq!(snapshots.len(), 3);
        assert_eq!(snapshots[0].unknown, 0);
        assert_eq!(snapshots[2].unknown, 3);
    }

    #[test]
    fn test_parse_ndjson_reports_line_number() {
        let input = "{\"timestamp\":\"2024-01-15T00:00:00Z\",\"walking\":0,\"running\":0}\nnot json\n";

        let err = RecordingAdapter::parse_ndjson(input).unwrap_err();

        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_parse_detects_array() {
        let json = r#"[{"timestamp":"2024-01-15T00:00:00Z","walking":5,"running":1}]"#;
        let snapshots = RecordingAdapter::parse(json).unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].walking, 5);
    }

    #[test]
    fn test_validate_flags_resets_and_ordering() {
        let base = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        let snapshots = vec![
            StepSnapshot::new(base, 10, 0),
            StepSnapshot::new(base + Duration::minutes(10), 50, 0),
            StepSnapshot::new(base + Duration::minutes(5), 5, 0),
        ];

        let report = RecordingAdapter::validate(&snapshots);

        assert_eq!(report.total, 3);
        assert_eq!(report.out_of_order, vec![2]);
        assert_eq!(report.resets, vec![2]);
        assert!(!report.is_ordered());
    }

    #[tokio::test]
    async fn test_playback_hides_future_readings() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 15, 0, 45, 0).unwrap(),
        ));
        let source = RecordedSource::new(RecordingAdapter::parse(SAMPLE).unwrap(), clock.clone());
        let handle = source.get_default().await.unwrap();
        source.activate(&handle).await.unwrap();

        let reading = source.current_reading(&handle).await.unwrap();
        assert_eq!(reading.walking, 40);

        let day = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        let history = source
            .reading_history(&handle, day, Duration::days(1))
            .await
            .unwrap();
        assert_eq!(history.len(), 2);

        clock.advance(Duration::hours(1));
        let history = source
            .reading_history(&handle, day, Duration::days(1))
            .await
            .unwrap();
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn test_replay_from_shifts_timestamps() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 6, 0, 0).unwrap();

        let source = RecordedSource::new(RecordingAdapter::parse(SAMPLE).unwrap(), clock)
            .replay_from(start);

        assert_eq!(source.snapshots()[0].timestamp, start);
        assert_eq!(
            source.snapshots()[2].timestamp,
            start + Duration::minutes(90)
        );
    }
}
