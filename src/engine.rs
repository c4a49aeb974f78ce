//! Step-series engine
//!
//! The engine owns all mutable state behind one async mutex. Every operation
//! that touches state or talks to the sensor takes that lock first, so a
//! navigation request and a poll tick never interleave their sensor calls.
//! Each completed refresh is published as a `StepModel` on a watch channel.

use crate::bucket::{build_day, build_day_series, build_day_total, DayWindow, Resolution};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::delta::DayAccumulator;
use crate::error::{SensorError, SensorErrorKind, StepsError};
use crate::navigator::DayNavigator;
use crate::poller::Poller;
use crate::retry::Recovering;
use crate::source::StepSource;
use crate::types::{Bucket, DayContext, Fetched, SensorHandle, StepDelta, StepModel};
use chrono::{DateTime, NaiveDate, Utc};
use std::sync::{Arc, Weak};
use tokio::sync::{watch, Mutex};

/// What a poll tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Today's totals were refreshed from the live counters
    Refreshed,
    /// The counter read failed; the summary was published as failed
    Degraded(SensorErrorKind),
    /// A past day is being viewed; nothing to refresh
    SkippedPastDay,
    /// The engine is not active
    Inactive,
    /// Local midnight passed; a full refresh of the new day ran instead.
    /// A failed summary for the new day is reported as `Degraded`.
    DayRolledOver,
}

/// Accumulator for the counters-only refresh of today
#[derive(Debug, Clone, Copy)]
struct TodayAnchor {
    date: NaiveDate,
    accumulator: DayAccumulator,
}

struct EngineState {
    handle: Option<SensorHandle>,
    sensor_active: bool,
    navigator: DayNavigator,
    today: Option<TodayAnchor>,
    model: StepModel,
}

struct EngineInner {
    source: Arc<dyn StepSource>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    resolution: Resolution,
    state: Mutex<EngineState>,
    model_tx: watch::Sender<StepModel>,
    poller: std::sync::Mutex<Option<Poller>>,
}

/// Cheaply cloneable handle to one engine
#[derive(Clone)]
pub struct StepsEngine {
    inner: Arc<EngineInner>,
}

impl StepsEngine {
    pub fn new(
        source: Arc<dyn StepSource>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Result<Self, StepsError> {
        config.validate()?;
        let resolution = config.resolution()?;
        let navigator = DayNavigator::new(config.max_day_offset);

        let now = clock.now();
        let today = DayWindow::local_date(now, config.utc_offset());
        let model = StepModel::empty(today, navigator.context(resolution), now);
        let (model_tx, _) = watch::channel(model.clone());

        Ok(Self {
            inner: Arc::new(EngineInner {
                source,
                clock,
                config,
                resolution,
                state: Mutex::new(EngineState {
                    handle: None,
                    sensor_active: false,
                    navigator,
                    today: None,
                    model,
                }),
                model_tx,
                poller: std::sync::Mutex::new(None),
            }),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Obtain the sensor, start its session, publish a full refresh and
    /// start polling.
    ///
    /// Initialization failures are terminal and leave the engine inactive;
    /// no retry happens here.
    pub async fn activate(&self) -> Result<StepModel, StepsError> {
        let mut state = self.inner.state.lock().await;
        if let Err(err) = self.inner.initialize(&mut state).await {
            state.sensor_active = false;
            tracing::warn!(
                source = self.inner.source.kind().as_str(),
                error = %err,
                "sensor initialization failed"
            );
            return Err(err.into());
        }
        tracing::info!(source = self.inner.source.kind().as_str(), "engine activated");
        let model = self.inner.full_refresh(&mut state).await?;

        // started under the state lock so a concurrent deactivate sees it
        self.start_poller();
        Ok(model)
    }

    /// Stop polling and end the sensor session. An in-flight refresh
    /// completes first.
    pub async fn deactivate(&self) {
        let poller = {
            let mut state = self.inner.state.lock().await;
            let poller = self.inner.take_poller();
            if state.sensor_active {
                if let Some(handle) = state.handle.as_ref() {
                    self.inner.source.deactivate(handle).await;
                }
            }
            state.sensor_active = false;
            state.today = None;
            poller
        };

        // a tick waiting on the lock now sees an inactive engine
        if let Some(poller) = poller {
            poller.stop().await;
        }
        tracing::info!("engine deactivated");
    }

    pub async fn is_active(&self) -> bool {
        self.inner.state.lock().await.sensor_active
    }

    /// Move the viewed day by `delta` (`+1` older, `-1` newer), clamped.
    /// A full refresh runs only if the day actually changed.
    pub async fn change_day(&self, delta: i32) -> Result<DayContext, StepsError> {
        let mut state = self.inner.state.lock().await;
        if !state.sensor_active {
            return Err(StepsError::NotActive);
        }

        if state.navigator.shift(delta) {
            tracing::debug!(
                delta,
                day_offset = state.navigator.offset(),
                "viewed day changed"
            );
            self.inner.full_refresh(&mut state).await?;
        } else {
            tracing::debug!(delta, day_offset = state.navigator.offset(), "day offset clamped");
        }
        Ok(state.navigator.context(self.inner.resolution))
    }

    pub async fn day_context(&self) -> DayContext {
        let state = self.inner.state.lock().await;
        state.navigator.context(self.inner.resolution)
    }

    /// Rebuild summary and series for the viewed day and publish them
    pub async fn update_model(&self) -> Result<StepModel, StepsError> {
        let mut state = self.inner.state.lock().await;
        if !state.sensor_active {
            return Err(StepsError::NotActive);
        }
        self.inner.full_refresh(&mut state).await
    }

    /// Counters-only refresh of today's totals
    pub async fn poll_tick(&self) -> PollOutcome {
        let mut state = self.inner.state.lock().await;
        self.inner.poll_locked(&mut state).await
    }

    /// Walking/running/unknown counts for the viewed day
    pub async fn current_day_summary(&self) -> Result<Fetched<StepDelta>, StepsError> {
        let state = self.inner.state.lock().await;
        let handle = self.inner.active_handle(&state)?;
        let (window, now) = self.inner.viewed_window(&state);

        let reader = Recovering::new(self.inner.source.as_ref(), &handle);
        let total = build_day_total(&window, now, &reader)
            .await
            .map(|(total, _)| total);
        Ok(Fetched::from_result(total))
    }

    /// Trend series for the viewed day at `resolution_minutes`
    pub async fn current_day_series(
        &self,
        resolution_minutes: u32,
    ) -> Result<Fetched<Vec<Bucket>>, StepsError> {
        let resolution = Resolution::new(resolution_minutes)?;
        let state = self.inner.state.lock().await;
        let handle = self.inner.active_handle(&state)?;
        let (window, now) = self.inner.viewed_window(&state);

        let reader = Recovering::new(self.inner.source.as_ref(), &handle);
        let series = build_day_series(
            &window,
            resolution,
            now,
            self.inner.config.series_strategy,
            &reader,
        )
        .await;
        Ok(Fetched::from_result(series))
    }

    /// Receive every published model
    pub fn subscribe(&self) -> watch::Receiver<StepModel> {
        self.inner.model_tx.subscribe()
    }

    /// Most recently published model
    pub fn model(&self) -> StepModel {
        self.inner.model_tx.borrow().clone()
    }

    pub fn is_polling(&self) -> bool {
        self.inner
            .poller
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(Poller::is_running)
    }

    fn start_poller(&self) {
        let Some(period) = self.inner.config.poll_interval() else {
            return;
        };

        let mut slot = self.inner.poller.lock().unwrap_or_else(|e| e.into_inner());
        if slot.as_ref().is_some_and(Poller::is_running) {
            return;
        }

        let weak: Weak<EngineInner> = Arc::downgrade(&self.inner);
        *slot = Some(Poller::spawn(period, move || {
            let weak = weak.clone();
            async move {
                let Some(inner) = weak.upgrade() else {
                    return false;
                };
                let outcome = StepsEngine { inner }.poll_tick().await;
                tracing::trace!(?outcome, "poll tick");
                true
            }
        }));
    }
}

impl EngineInner {
    async fn initialize(&self, state: &mut EngineState) -> Result<(), SensorError> {
        let handle = match state.handle.clone() {
            Some(handle) => handle,
            None => {
                let handle = self.source.get_default().await?;
                tracing::debug!(handle = %handle.id, "obtained sensor handle");
                state.handle = Some(handle.clone());
                handle
            }
        };

        self.source.activate(&handle).await?;
        state.sensor_active = true;
        Ok(())
    }

    fn take_poller(&self) -> Option<Poller> {
        self.poller
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    fn active_handle(&self, state: &EngineState) -> Result<SensorHandle, StepsError> {
        match (&state.handle, state.sensor_active) {
            (Some(handle), true) => Ok(handle.clone()),
            _ => Err(StepsError::NotActive),
        }
    }

    fn today(&self, now: DateTime<Utc>) -> NaiveDate {
        DayWindow::local_date(now, self.config.utc_offset())
    }

    fn viewed_window(&self, state: &EngineState) -> (DayWindow, DateTime<Utc>) {
        let now = self.clock.now();
        let date = state.navigator.date_for(self.today(now));
        (DayWindow::for_date(date, self.config.utc_offset()), now)
    }

    async fn full_refresh(&self, state: &mut EngineState) -> Result<StepModel, StepsError> {
        let handle = self.active_handle(state)?;
        let (window, now) = self.viewed_window(state);
        let reader = Recovering::new(self.source.as_ref(), &handle);

        let (total, series) = build_day(
            &window,
            self.resolution,
            now,
            self.config.series_strategy,
            &reader,
        )
        .await;

        let summary = match total {
            Ok((total, accumulator)) => {
                if state.navigator.is_today() {
                    state.today = accumulator.map(|accumulator| TodayAnchor {
                        date: window.date,
                        accumulator,
                    });
                }
                Fetched::fresh(total)
            }
            Err(err) => {
                tracing::warn!(date = %window.date, error = %err, "day summary unavailable");
                if state.navigator.is_today() {
                    state.today = None;
                }
                Fetched::failed(StepDelta::ZERO, err)
            }
        };

        if let Err(err) = &series {
            tracing::warn!(date = %window.date, error = %err, "day series unavailable");
        }
        let series = Fetched::from_result(series);

        tracing::debug!(
            date = %window.date,
            total = summary.value().total(),
            buckets = series.value().len(),
            reactivations = reader.reactivations(),
            "full refresh complete"
        );

        let model = StepModel {
            date: window.date,
            day: state.navigator.context(self.resolution),
            summary,
            series,
            updated_at: now,
            revision: state.model.revision,
        };
        Ok(self.publish(state, model))
    }

    async fn poll_locked(&self, state: &mut EngineState) -> PollOutcome {
        if !state.sensor_active {
            return PollOutcome::Inactive;
        }
        if !state.navigator.is_today() {
            return PollOutcome::SkippedPastDay;
        }

        let now = self.clock.now();
        let today = self.today(now);
        if state.model.date != today {
            tracing::info!(from = %state.model.date, to = %today, "day rolled over");
            state.today = None;
            return match self.full_refresh(state).await {
                Ok(model) => match model.summary.error() {
                    Some(err) => PollOutcome::Degraded(err.kind()),
                    None => PollOutcome::DayRolledOver,
                },
                Err(err) => {
                    tracing::warn!(date = %today, error = %err, "refresh after rollover failed");
                    err.sensor_kind()
                        .map_or(PollOutcome::Inactive, PollOutcome::Degraded)
                }
            };
        }

        let Ok(handle) = self.active_handle(state) else {
            return PollOutcome::Inactive;
        };
        let reader = Recovering::new(self.source.as_ref(), &handle);

        let summary = match self.today_total(state, today, now, &reader).await {
            Ok(total) => Fetched::fresh(total),
            Err(err) => {
                tracing::warn!(error = %err, "live counter read failed");
                Fetched::failed(StepDelta::ZERO, err)
            }
        };

        let outcome = match summary.error() {
            Some(err) => PollOutcome::Degraded(err.kind()),
            None => PollOutcome::Refreshed,
        };

        let model = StepModel {
            summary,
            updated_at: now,
            ..state.model.clone()
        };
        self.publish(state, model);
        outcome
    }

    /// Advance today's anchor with the live reading. Without an anchor the
    /// day's history is folded first, and only an empty day is anchored at
    /// the live reading itself.
    async fn today_total(
        &self,
        state: &mut EngineState,
        today: NaiveDate,
        now: DateTime<Utc>,
        reader: &Recovering<'_>,
    ) -> Result<StepDelta, SensorError> {
        let reading = reader.current_reading().await?;
        if let Some(anchor) = state.today.as_mut().filter(|anchor| anchor.date == today) {
            return Ok(anchor.accumulator.advance(reading));
        }

        let window = DayWindow::for_date(today, self.config.utc_offset());
        let (_, accumulator) = build_day_total(&window, now, reader).await?;
        let mut accumulator = accumulator.unwrap_or_else(|| {
            tracing::debug!(date = %today, "anchoring today's totals at live reading");
            DayAccumulator::new(reading)
        });
        let total = accumulator.advance(reading);
        state.today = Some(TodayAnchor {
            date: today,
            accumulator,
        });
        Ok(total)
    }

    fn publish(&self, state: &mut EngineState, mut model: StepModel) -> StepModel {
        model.revision = state.model.revision + 1;
        state.model = model.clone();
        self.model_tx.send_replace(model.clone());
        model
    }
}
