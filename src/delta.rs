//! Delta calculation
//!
//! This module turns cumulative counter snapshots into non-negative step
//! counts:
//! - Pairwise deltas between two snapshots
//! - Session-reset tolerant accumulation over a batch of snapshots

use crate::types::{StepDelta, StepSnapshot};

/// Delta calculator for cumulative step snapshots
pub struct DeltaCalculator;

impl DeltaCalculator {
    /// Per-category `max(0, last - first)`
    pub fn delta(first: &StepSnapshot, last: &StepSnapshot) -> StepDelta {
        StepDelta {
            walking: last.walking.saturating_sub(first.walking),
            running: last.running.saturating_sub(first.running),
            unknown: last.unknown.saturating_sub(first.unknown),
        }
    }

    /// Steps taken across a batch of readings ordered by time.
    ///
    /// Equals `delta(first, last)` for a monotonic batch. A counter that goes
    /// backwards is treated as a session reset and re-anchored.
    pub fn batch_delta(readings: &[StepSnapshot]) -> StepDelta {
        let mut iter = readings.iter();
        let Some(first) = iter.next() else {
            return StepDelta::ZERO;
        };

        let mut accumulator = DayAccumulator::new(*first);
        for reading in iter {
            accumulator.advance(*reading);
        }
        accumulator.total()
    }
}

/// Running total anchored at the first reading of a batch.
///
/// Each category advances by the clamped difference between consecutive
/// readings. When a category decreases the new reading becomes the anchor
/// for that category and contributes nothing, which keeps the total
/// invariant to a uniform offset on the raw counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayAccumulator {
    baseline: StepSnapshot,
    last: StepSnapshot,
    total: StepDelta,
    resets: u32,
}

impl DayAccumulator {
    /// Start accumulating with `baseline` as the zero point
    pub fn new(baseline: StepSnapshot) -> Self {
        Self {
            baseline,
            last: baseline,
            total: StepDelta::ZERO,
            resets: 0,
        }
    }

    /// Fold the next reading and return the updated total
    pub fn advance(&mut self, reading: StepSnapshot) -> StepDelta {
        let regressed = reading.walking < self.last.walking
            || reading.running < self.last.running
            || reading.unknown < self.last.unknown;
        if regressed {
            self.resets += 1;
            tracing::debug!(
                at = %reading.timestamp,
                walking = reading.walking,
                running = reading.running,
                "step counter went backwards, re-anchoring"
            );
        }

        self.total += DeltaCalculator::delta(&self.last, &reading);
        self.last = reading;
        self.total
    }

    /// Steps since the baseline reading
    pub fn total(&self) -> StepDelta {
        self.total
    }

    /// Reading that defined the zero point
    pub fn baseline(&self) -> &StepSnapshot {
        &self.baseline
    }

    /// Most recent reading folded in
    pub fn last(&self) -> &StepSnapshot {
        &self.last
    }

    /// Number of counter regressions seen
    pub fn resets(&self) -> u32 {
        self.resets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn snap(minute: i64, walking: u32, running: u32) -> StepSnapshot {
        let base = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        StepSnapshot::new(base + Duration::minutes(minute), walking, running)
    }

    fn offset_all(readings: &[StepSnapshot], by: u32) -> Vec<StepSnapshot> {
        readings
            .iter()
            .map(|r| {
                StepSnapshot::new(r.timestamp, r.walking + by, r.running + by)
                    .with_unknown(r.unknown + by)
            })
            .collect()
    }

    #[test]
    fn test_delta_per_category() {
        let first = snap(0, 100, 20).with_unknown(3);
        let last = snap(15, 180, 50).with_unknown(5);

        let delta = DeltaCalculator::delta(&first, &last);

        assert_eq!(delta, StepDelta::new(80, 30, 2));
        assert_eq!(delta.total(), 112);
    }

    #[test]
    fn test_delta_same_snapshot_is_zero() {
        let s = snap(5, 42, 7);
        assert!(DeltaCalculator::delta(&s, &s).is_zero());
    }

    #[test]
    fn test_delta_never_negative() {
        let first = snap(0, 500, 300);
        let last = snap(10, 10, 400);

        let delta = DeltaCalculator::delta(&first, &last);

        assert_eq!(delta.walking, 0);
        assert_eq!(delta.running, 100);
    }

    #[test]
    fn test_batch_delta_empty_and_single() {
        assert!(DeltaCalculator::batch_delta(&[]).is_zero());
        assert!(DeltaCalculator::batch_delta(&[snap(0, 10, 10)]).is_zero());
    }

    #[test]
    fn test_batch_delta_matches_first_last_when_monotonic() {
        let readings = vec![snap(0, 10, 0), snap(5, 40, 2), snap(9, 90, 12)];

        let batch = DeltaCalculator::batch_delta(&readings);
        let pair = DeltaCalculator::delta(&readings[0], &readings[2]);

        assert_eq!(batch, pair);
    }

    #[test]
    fn test_delta_invariant_to_uniform_offset() {
        let first = snap(0, 12, 4);
        let last = snap(30, 75, 9);
        let shifted = offset_all(&[first, last], 10_000);

        assert_eq!(
            DeltaCalculator::delta(&first, &last),
            DeltaCalculator::delta(&shifted[0], &shifted[1])
        );
    }

    #[test]
    fn test_batch_delta_reanchors_after_session_reset() {
        // 100 -> 150 in the first session, then the counter restarts at 20
        let readings = vec![
            snap(0, 100, 0),
            snap(10, 150, 0),
            snap(20, 20, 0),
            snap(30, 60, 0),
        ];

        let batch = DeltaCalculator::batch_delta(&readings);
        assert_eq!(batch.walking, 50 + 40);

        // A naive first/last delta loses the first session entirely
        let naive = DeltaCalculator::delta(&readings[0], &readings[3]);
        assert_eq!(naive.walking, 0);
        assert_ne!(naive, batch);
    }

    #[test]
    fn test_batch_delta_with_reset_is_offset_invariant() {
        let readings = vec![
            snap(0, 100, 5),
            snap(10, 150, 9),
            snap(20, 20, 1),
            snap(30, 60, 4),
        ];
        let shifted = offset_all(&readings, 7_000);

        assert_eq!(
            DeltaCalculator::batch_delta(&readings),
            DeltaCalculator::batch_delta(&shifted)
        );
    }

    #[test]
    fn test_accumulator_counts_resets() {
        let mut acc = DayAccumulator::new(snap(0, 10, 10));
        acc.advance(snap(1, 20, 10));
        acc.advance(snap(2, 5, 10));
        acc.advance(snap(3, 8, 12));

        assert_eq!(acc.resets(), 1);
        assert_eq!(acc.total(), StepDelta::new(13, 2, 0));
        assert_eq!(acc.last().walking, 8);
        assert_eq!(acc.baseline().walking, 10);
    }
}
