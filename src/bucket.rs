//! Bucketizer
//!
//! Turns a day's irregular cumulative readings into a fixed-resolution,
//! monotonic trend line:
//! - Day windows in a fixed UTC offset
//! - Folding a merged reading stream (or per-interval deltas) into buckets
//! - Gap filling and trimming after the last real reading

use crate::config::SeriesStrategy;
use crate::delta::{DayAccumulator, DeltaCalculator};
use crate::error::{SensorError, StepsError};
use crate::retry::Recovering;
use crate::types::{Bucket, StepDelta, StepSnapshot};
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};

pub const MINUTES_PER_DAY: u32 = 1440;

/// Smallest supported bucket width
pub const MIN_RESOLUTION_MINUTES: u32 = 5;

/// Bucket width in minutes; at least 5 and a divisor of 1440
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Resolution(u32);

impl Resolution {
    pub fn new(minutes: u32) -> Result<Self, StepsError> {
        if minutes < MIN_RESOLUTION_MINUTES || MINUTES_PER_DAY % minutes != 0 {
            return Err(StepsError::InvalidResolution(minutes));
        }
        Ok(Self(minutes))
    }

    pub fn minutes(&self) -> u32 {
        self.0
    }

    pub fn duration(&self) -> Duration {
        Duration::minutes(self.0 as i64)
    }

    /// Buckets in a full day
    pub fn buckets_per_day(&self) -> u32 {
        MINUTES_PER_DAY / self.0
    }
}

/// One calendar day as a UTC interval `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayWindow {
    pub date: NaiveDate,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DayWindow {
    /// Local midnight to midnight of `date` at `offset`
    pub fn for_date(date: NaiveDate, offset: FixedOffset) -> Self {
        let local_midnight = date.and_time(NaiveTime::MIN);
        let utc_midnight =
            local_midnight - Duration::seconds(offset.local_minus_utc() as i64);
        let start = Utc.from_utc_datetime(&utc_midnight);
        Self {
            date,
            start,
            end: start + Duration::days(1),
        }
    }

    /// Calendar date of `instant` at `offset`
    pub fn local_date(instant: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
        instant.with_timezone(&offset).date_naive()
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Minutes of this day that have already happened
    pub fn minutes_elapsed(&self, now: DateTime<Utc>) -> u32 {
        if now >= self.end {
            MINUTES_PER_DAY
        } else if now <= self.start {
            0
        } else {
            (now - self.start).num_minutes() as u32
        }
    }

    /// `floor(elapsed / resolution) + 1`, never past the last bucket of the day
    pub fn interval_count(&self, now: DateTime<Utc>, resolution: Resolution) -> usize {
        let count = self.minutes_elapsed(now) / resolution.minutes() + 1;
        count.min(resolution.buckets_per_day()) as usize
    }

    /// Minutes from midnight, or `None` outside the window
    pub fn minutes_since_start(&self, instant: DateTime<Utc>) -> Option<u32> {
        if instant < self.start || instant >= self.end {
            return None;
        }
        Some((instant - self.start).num_minutes() as u32)
    }

    pub fn bucket_start(&self, index: usize, resolution: Resolution) -> DateTime<Utc> {
        self.start + Duration::minutes(index as i64 * resolution.minutes() as i64)
    }
}

/// Pure bucket construction
pub struct Bucketizer;

impl Bucketizer {
    /// Fold a merged, time-ordered reading stream into buckets.
    ///
    /// The first reading inside the window is the day's zero point. Each
    /// reading sets its bucket to the running total at that reading, so a
    /// later reading in the same bucket wins.
    pub fn fold_day_stream(
        window: &DayWindow,
        resolution: Resolution,
        now: DateTime<Utc>,
        readings: &[StepSnapshot],
    ) -> Vec<Bucket> {
        let count = window.interval_count(now, resolution);
        let mut slots: Vec<Option<u32>> = vec![None; count];
        let mut accumulator: Option<DayAccumulator> = None;

        for reading in readings {
            let Some(minute) = window.minutes_since_start(reading.timestamp) else {
                continue;
            };
            let index = (minute / resolution.minutes()) as usize;
            if index >= count {
                continue;
            }

            let total = match accumulator.as_mut() {
                Some(acc) => acc.advance(*reading).total(),
                None => {
                    accumulator = Some(DayAccumulator::new(*reading));
                    0
                }
            };
            slots[index] = Some(total);
        }

        Self::finalize(resolution, slots)
    }

    /// Build buckets from per-interval deltas; `None` marks an interval
    /// without readings.
    pub fn from_interval_deltas(
        resolution: Resolution,
        deltas: &[Option<StepDelta>],
    ) -> Vec<Bucket> {
        let mut total: u32 = 0;
        let slots = deltas
            .iter()
            .map(|delta| {
                delta.map(|d| {
                    total = total.saturating_add(d.total());
                    total
                })
            })
            .collect();
        Self::finalize(resolution, slots)
    }

    /// Trim after the last filled slot, zero-fill, then forward-fill so the
    /// series never decreases.
    pub fn finalize(resolution: Resolution, slots: Vec<Option<u32>>) -> Vec<Bucket> {
        let Some(last) = slots.iter().rposition(Option::is_some) else {
            return Vec::new();
        };

        let mut running = 0u32;
        slots
            .into_iter()
            .take(last + 1)
            .enumerate()
            .map(|(index, slot)| {
                running = running.max(slot.unwrap_or(0));
                Bucket::new(index as u32 * resolution.minutes(), running)
            })
            .collect()
    }

    /// Steps on one day and the accumulator anchored at its first reading
    pub fn day_total(
        window: &DayWindow,
        readings: &[StepSnapshot],
    ) -> DayTotal {
        let mut accumulator: Option<DayAccumulator> = None;
        for reading in readings
            .iter()
            .filter(|r| window.minutes_since_start(r.timestamp).is_some())
        {
            match accumulator.as_mut() {
                Some(acc) => {
                    acc.advance(*reading);
                }
                None => accumulator = Some(DayAccumulator::new(*reading)),
            }
        }

        let total = accumulator
            .as_ref()
            .map(DayAccumulator::total)
            .unwrap_or(StepDelta::ZERO);
        (total, accumulator)
    }
}

/// Day total plus the accumulator that produced it
pub type DayTotal = (StepDelta, Option<DayAccumulator>);

/// Fetch and bucket one day's readings
pub async fn build_day_series(
    window: &DayWindow,
    resolution: Resolution,
    now: DateTime<Utc>,
    strategy: SeriesStrategy,
    reader: &Recovering<'_>,
) -> Result<Vec<Bucket>, SensorError> {
    if now <= window.start {
        return Ok(Vec::new());
    }

    match strategy {
        SeriesStrategy::DayStream => {
            let readings = reader
                .reading_history(window.start, window.duration())
                .await?;
            Ok(stream_series(window, resolution, now, &readings))
        }
        SeriesStrategy::PerInterval => interval_series(window, resolution, now, reader).await,
    }
}

/// Steps taken so far on one day, plus the accumulator anchored at the
/// day's first reading
pub async fn build_day_total(
    window: &DayWindow,
    now: DateTime<Utc>,
    reader: &Recovering<'_>,
) -> Result<DayTotal, SensorError> {
    if now <= window.start {
        return Ok((StepDelta::ZERO, None));
    }

    let readings = reader
        .reading_history(window.start, window.duration())
        .await?;
    Ok(Bucketizer::day_total(window, &readings))
}

/// Total and series of one day. With `DayStream` both are folded from a
/// single history fetch.
pub async fn build_day(
    window: &DayWindow,
    resolution: Resolution,
    now: DateTime<Utc>,
    strategy: SeriesStrategy,
    reader: &Recovering<'_>,
) -> (Result<DayTotal, SensorError>, Result<Vec<Bucket>, SensorError>) {
    if now <= window.start {
        return (Ok((StepDelta::ZERO, None)), Ok(Vec::new()));
    }

    let history = reader
        .reading_history(window.start, window.duration())
        .await;
    let total = history
        .as_ref()
        .map(|readings| Bucketizer::day_total(window, readings))
        .map_err(|err| err.clone());

    let series = match strategy {
        SeriesStrategy::DayStream => {
            history.map(|readings| stream_series(window, resolution, now, &readings))
        }
        SeriesStrategy::PerInterval => interval_series(window, resolution, now, reader).await,
    };
    (total, series)
}

fn stream_series(
    window: &DayWindow,
    resolution: Resolution,
    now: DateTime<Utc>,
    readings: &[StepSnapshot],
) -> Vec<Bucket> {
    tracing::debug!(
        date = %window.date,
        readings = readings.len(),
        "folding day stream"
    );
    Bucketizer::fold_day_stream(window, resolution, now, readings)
}

async fn interval_series(
    window: &DayWindow,
    resolution: Resolution,
    now: DateTime<Utc>,
    reader: &Recovering<'_>,
) -> Result<Vec<Bucket>, SensorError> {
    let count = window.interval_count(now, resolution);
    let mut deltas = Vec::with_capacity(count);
    for index in 0..count {
        let bucket_start = window.bucket_start(index, resolution);
        if bucket_start > now || bucket_start >= window.end {
            break;
        }
        let batch = reader
            .reading_history(bucket_start, resolution.duration())
            .await?;
        deltas.push(if batch.is_empty() {
            None
        } else {
            Some(DeltaCalculator::batch_delta(&batch))
        });
    }
    tracing::debug!(date = %window.date, intervals = deltas.len(), "folded interval deltas");
    Ok(Bucketizer::from_interval_deltas(resolution, &deltas))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::error::SensorErrorKind;
    use crate::source::{MemorySource, StepSource};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn day() -> DayWindow {
        DayWindow::for_date(
            NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            FixedOffset::east_opt(0).unwrap(),
        )
    }

    fn at(window: &DayWindow, minute: i64, walking: u32) -> StepSnapshot {
        StepSnapshot::new(window.start + Duration::minutes(minute), walking, 0)
    }

    fn res(minutes: u32) -> Resolution {
        Resolution::new(minutes).unwrap()
    }

    #[test]
    fn test_resolution_rules() {
        assert!(Resolution::new(5).is_ok());
        assert!(Resolution::new(15).is_ok());
        assert!(Resolution::new(60).is_ok());
        assert!(matches!(
            Resolution::new(4),
            Err(StepsError::InvalidResolution(4))
        ));
        assert!(matches!(
            Resolution::new(7),
            Err(StepsError::InvalidResolution(7))
        ));
        assert!(Resolution::new(0).is_err());
    }

    #[test]
    fn test_day_window_respects_offset() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let window = DayWindow::for_date(date, FixedOffset::east_opt(2 * 3600).unwrap());

        assert_eq!(window.start, Utc.with_ymd_and_hms(2024, 1, 14, 22, 0, 0).unwrap());
        assert_eq!(window.end, Utc.with_ymd_and_hms(2024, 1, 15, 22, 0, 0).unwrap());
        assert_eq!(
            DayWindow::local_date(window.start, FixedOffset::east_opt(2 * 3600).unwrap()),
            date
        );
    }

    #[test]
    fn test_interval_count_today_and_past() {
        let window = day();
        let now = window.start + Duration::minutes(95);

        assert_eq!(window.interval_count(now, res(30)), 4);
        assert_eq!(window.interval_count(window.end + Duration::hours(3), res(30)), 48);
    }

    #[test]
    fn test_fold_day_stream_scenario() {
        let window = day();
        let readings = vec![
            at(&window, 0, 0),
            at(&window, 30, 50),
            at(&window, 90, 120),
            at(&window, 1380, 900),
        ];

        let series =
            Bucketizer::fold_day_stream(&window, res(30), window.end, &readings);

        assert_eq!(series.len(), 47);
        assert_eq!(series[0], Bucket::new(0, 0));
        assert_eq!(series[1], Bucket::new(30, 50));
        assert_eq!(series[2], Bucket::new(60, 50));
        assert_eq!(series[3], Bucket::new(90, 120));
        assert!(series[4..46].iter().all(|b| b.cumulative_steps == 120));
        assert_eq!(series[46], Bucket::new(1380, 900));
    }

    #[test]
    fn test_boundary_reading_belongs_to_starting_bucket() {
        let window = day();
        let readings = vec![
            at(&window, 0, 0),
            StepSnapshot::new(window.start + Duration::seconds(29 * 60 + 59), 10, 0),
            at(&window, 30, 25),
        ];

        let series = Bucketizer::fold_day_stream(&window, res(30), window.end, &readings);

        assert_eq!(series, vec![Bucket::new(0, 10), Bucket::new(30, 25)]);
    }

    #[test]
    fn test_leading_buckets_stay_zero() {
        let window = day();
        let readings = vec![at(&window, 70, 500), at(&window, 100, 560)];

        let series = Bucketizer::fold_day_stream(&window, res(30), window.end, &readings);

        assert_eq!(
            series,
            vec![
                Bucket::new(0, 0),
                Bucket::new(30, 0),
                Bucket::new(60, 0),
                Bucket::new(90, 60),
            ]
        );
    }

    #[test]
    fn test_empty_day_is_empty_series() {
        let window = day();
        assert!(Bucketizer::fold_day_stream(&window, res(15), window.end, &[]).is_empty());
        assert!(Bucketizer::from_interval_deltas(res(15), &[None, None]).is_empty());
    }

    #[test]
    fn test_readings_outside_window_ignored() {
        let window = day();
        let readings = vec![
            at(&window, -10, 1_000),
            at(&window, 0, 1_010),
            at(&window, 45, 1_050),
            at(&window, 1_450, 9_999),
        ];

        let series = Bucketizer::fold_day_stream(&window, res(15), window.end, &readings);

        assert_eq!(series.len(), 4);
        assert_eq!(series.last().copied(), Some(Bucket::new(45, 40)));
    }

    #[test]
    fn test_session_reset_mid_day_keeps_series_monotonic() {
        let window = day();
        let readings = vec![
            at(&window, 0, 100),
            at(&window, 60, 300),
            at(&window, 120, 10),
            at(&window, 180, 90),
        ];

        let series = Bucketizer::fold_day_stream(&window, res(60), window.end, &readings);

        let totals: Vec<u32> = series.iter().map(|b| b.cumulative_steps).collect();
        assert_eq!(totals, vec![0, 200, 200, 280]);
    }

    #[test]
    fn test_interval_deltas_trim_after_last_reading() {
        let deltas = vec![
            Some(StepDelta::new(10, 0, 0)),
            None,
            Some(StepDelta::new(5, 5, 0)),
            None,
            None,
        ];

        let series = Bucketizer::from_interval_deltas(res(15), &deltas);

        assert_eq!(
            series,
            vec![Bucket::new(0, 10), Bucket::new(15, 10), Bucket::new(30, 20)]
        );
    }

    #[tokio::test]
    async fn test_per_interval_strategy_against_source() {
        let window = day();
        let clock = Arc::new(ManualClock::new(window.start));
        let source = MemorySource::new(clock.clone());
        let handle = source.get_default().await.unwrap();
        source.activate(&handle).await.unwrap();

        source.record(0, 0);
        clock.advance(Duration::minutes(10));
        source.record(40, 0);
        clock.advance(Duration::minutes(20));
        source.record(0, 0);
        clock.advance(Duration::minutes(10));
        source.record(25, 5);
        clock.advance(Duration::minutes(5));

        let reader = Recovering::new(&source, &handle);
        let now = clock.now();
        let per_interval =
            build_day_series(&window, res(30), now, SeriesStrategy::PerInterval, &reader)
                .await
                .unwrap();

        assert_eq!(per_interval, vec![Bucket::new(0, 40), Bucket::new(30, 70)]);

        let (total, anchor) = build_day_total(&window, now, &reader).await.unwrap();
        assert_eq!(total, StepDelta::new(65, 5, 0));
        assert_eq!(anchor.map(|a| a.baseline().walking), Some(0));
    }

    #[tokio::test]
    async fn test_future_day_is_empty() {
        let window = day();
        let clock = Arc::new(ManualClock::new(window.start - Duration::hours(1)));
        let source = MemorySource::new(clock.clone());
        let handle = source.get_default().await.unwrap();
        let reader = Recovering::new(&source, &handle);

        let series = build_day_series(
            &window,
            res(15),
            clock.now(),
            SeriesStrategy::DayStream,
            &reader,
        )
        .await
        .unwrap();

        assert!(series.is_empty());
        assert_eq!(source.probe().reads(), 0);
    }

    #[tokio::test]
    async fn test_build_day_stream_fetches_history_once() {
        let window = day();
        let clock = Arc::new(ManualClock::new(window.start + Duration::hours(8)));
        let source = MemorySource::new(clock.clone());
        let handle = source.get_default().await.unwrap();
        source.activate(&handle).await.unwrap();

        source.record(0, 0);
        clock.advance(Duration::minutes(40));
        source.record(90, 10);

        let reader = Recovering::new(&source, &handle);
        let (total, series) =
            build_day(&window, res(30), clock.now(), SeriesStrategy::DayStream, &reader).await;

        let (total, anchor) = total.unwrap();
        assert_eq!(total, StepDelta::new(90, 10, 0));
        assert!(anchor.is_some());
        assert_eq!(series.unwrap().last(), Some(&Bucket::new(510, 100)));
        assert_eq!(source.probe().reads(), 1);
    }

    #[tokio::test]
    async fn test_build_day_shares_history_failure() {
        let window = day();
        let clock = Arc::new(ManualClock::new(window.start + Duration::hours(8)));
        let source = MemorySource::new(clock.clone());
        let handle = source.get_default().await.unwrap();
        source.activate(&handle).await.unwrap();
        source.faults().fail_next(SensorErrorKind::Unknown, 1);

        let reader = Recovering::new(&source, &handle);
        let (total, series) =
            build_day(&window, res(30), clock.now(), SeriesStrategy::DayStream, &reader).await;

        assert_eq!(total.unwrap_err().kind(), SensorErrorKind::Unknown);
        assert_eq!(series.unwrap_err().kind(), SensorErrorKind::Unknown);
        assert_eq!(source.probe().reads(), 1);
    }

    proptest! {
        #[test]
        fn prop_series_is_monotonic(
            mut points in prop::collection::vec((0u32..1440, 0u32..50_000, 0u32..50_000), 0..64),
            resolution in prop::sample::select(vec![5u32, 10, 15, 30, 60, 120]),
        ) {
            let window = day();
            points.sort_by_key(|p| p.0);
            let readings: Vec<StepSnapshot> = points
                .iter()
                .map(|(minute, w, r)| {
                    StepSnapshot::new(window.start + Duration::minutes(*minute as i64), *w, *r)
                })
                .collect();
            let resolution = res(resolution);

            let series = Bucketizer::fold_day_stream(&window, resolution, window.end, &readings);

            prop_assert_eq!(series.is_empty(), readings.is_empty());
            for pair in series.windows(2) {
                prop_assert!(pair[0].cumulative_steps <= pair[1].cumulative_steps);
                prop_assert_eq!(
                    pair[1].offset_minutes - pair[0].offset_minutes,
                    resolution.minutes()
                );
            }
            if let Some(first) = series.first() {
                prop_assert_eq!(first.offset_minutes, 0);
            }
        }
    }
}
