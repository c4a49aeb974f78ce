//! Step sources
//!
//! A step source is the capability the engine reads cumulative counters
//! from. Backends differ (platform pedometer, vendor SDK, recordings), but
//! the engine only ever sees this trait; one backend is chosen at activation
//! by probing `is_supported` in preference order.

mod fault;
mod memory;
mod recording;

pub use fault::{CallProbe, FaultPlan, InFlightGuard};
pub use memory::MemorySource;
pub use recording::{RecordedSource, RecordingAdapter, RecordingReport};

use crate::error::SensorError;
use crate::types::{SensorHandle, SourceKind, StepSnapshot};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

/// Capability interface to a cumulative step counter
#[async_trait]
pub trait StepSource: Send + Sync {
    /// Backend identifier
    fn kind(&self) -> SourceKind;

    /// Whether this device exposes the sensor at all
    async fn is_supported(&self) -> bool;

    /// Obtain the default sensor handle (fails with `Unsupported`)
    async fn get_default(&self) -> Result<SensorHandle, SensorError>;

    /// Start or resume a sensor session
    async fn activate(&self, handle: &SensorHandle) -> Result<(), SensorError>;

    /// Stop the sensor session; best-effort
    async fn deactivate(&self, handle: &SensorHandle);

    /// Latest cumulative counters
    async fn current_reading(&self, handle: &SensorHandle) -> Result<StepSnapshot, SensorError>;

    /// Readings in `[start, start + duration)`, ordered by time, possibly empty
    async fn reading_history(
        &self,
        handle: &SensorHandle,
        start: DateTime<Utc>,
        duration: Duration,
    ) -> Result<Vec<StepSnapshot>, SensorError>;
}

/// Pick the first supported source, in preference order
pub async fn select_source(
    candidates: Vec<Arc<dyn StepSource>>,
) -> Result<Arc<dyn StepSource>, SensorError> {
    for candidate in candidates {
        if candidate.is_supported().await {
            tracing::info!(kind = candidate.kind().as_str(), "selected step source");
            return Ok(candidate);
        }
        tracing::debug!(kind = candidate.kind().as_str(), "step source not supported");
    }
    Err(SensorError::unsupported("no supported step source"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::SensorErrorKind;
    use chrono::TimeZone;

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap(),
        ))
    }

    #[tokio::test]
    async fn test_select_source_prefers_first_supported() {
        let clock = clock();
        let unsupported: Arc<dyn StepSource> = Arc::new(MemorySource::unsupported(clock.clone()));
        let recording: Arc<dyn StepSource> =
            Arc::new(RecordedSource::new(Vec::new(), clock.clone()));
        let memory: Arc<dyn StepSource> = Arc::new(MemorySource::new(clock));

        let chosen = select_source(vec![unsupported, recording, memory])
            .await
            .unwrap();

        assert_eq!(chosen.kind(), SourceKind::Recording);
    }

    #[tokio::test]
    async fn test_select_source_none_supported() {
        let unsupported: Arc<dyn StepSource> = Arc::new(MemorySource::unsupported(clock()));

        let Err(err) = select_source(vec![unsupported]).await else {
            panic!("an unsupported source must not be selected");
        };

        assert_eq!(err.kind(), SensorErrorKind::Unsupported);
    }
}
