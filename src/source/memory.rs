//! Live in-process step counter
//!
//! Hosts that detect steps themselves (or bridge a platform callback) feed
//! counts into a `MemorySource`, which then behaves like a pedometer driver:
//! cumulative counters, a reading history, a session that can lapse, and a
//! capability switch that can be revoked.

use super::fault::{CallProbe, FaultPlan};
use super::StepSource;
use crate::clock::Clock;
use crate::error::SensorError;
use crate::types::{SensorHandle, SourceKind, StepSnapshot};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex, MutexGuard};

/// In-memory cumulative step counter
pub struct MemorySource {
    clock: Arc<dyn Clock>,
    supported: bool,
    latency: Option<std::time::Duration>,
    state: Mutex<MemoryState>,
    faults: FaultPlan,
    probe: CallProbe,
}

struct MemoryState {
    session_active: bool,
    capability_enabled: bool,
    walking: u32,
    running: u32,
    unknown: u32,
    history: Vec<StepSnapshot>,
}

impl MemorySource {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            supported: true,
            latency: None,
            state: Mutex::new(MemoryState {
                session_active: false,
                capability_enabled: true,
                walking: 0,
                running: 0,
                unknown: 0,
                history: Vec::new(),
            }),
            faults: FaultPlan::default(),
            probe: CallProbe::default(),
        }
    }

    /// A device without a step counter
    pub fn unsupported(clock: Arc<dyn Clock>) -> Self {
        Self {
            supported: false,
            ..Self::new(clock)
        }
    }

    /// Delay every driver call, as an IPC round-trip would
    pub fn with_latency(mut self, latency: std::time::Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Count new steps at the current clock time
    pub fn record(&self, walking: u32, running: u32) -> StepSnapshot {
        let now = self.clock.now();
        let mut state = self.state();
        state.walking = state.walking.saturating_add(walking);
        state.running = state.running.saturating_add(running);
        let snapshot = StepSnapshot::new(now, state.walking, state.running)
            .with_unknown(state.unknown);
        state.history.push(snapshot);
        snapshot
    }

    /// Append a raw snapshot, replacing the live counters
    pub fn push(&self, snapshot: StepSnapshot) {
        let mut state = self.state();
        state.walking = snapshot.walking;
        state.running = snapshot.running;
        state.unknown = snapshot.unknown;
        state.history.push(snapshot);
    }

    /// Sensor reinitialization: cumulative counters start over at zero
    pub fn restart_counters(&self) {
        let mut state = self.state();
        state.walking = 0;
        state.running = 0;
        state.unknown = 0;
    }

    /// Let the driver session lapse; data calls fail until reactivated
    pub fn lapse_session(&self) {
        self.state().session_active = false;
    }

    /// Toggle the motion-data permission
    pub fn set_capability_enabled(&self, enabled: bool) {
        self.state().capability_enabled = enabled;
    }

    pub fn is_session_active(&self) -> bool {
        self.state().session_active
    }

    pub fn faults(&self) -> &FaultPlan {
        &self.faults
    }

    pub fn probe(&self) -> &CallProbe {
        &self.probe
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn check_readable(&self, operation: &str) -> Result<(), SensorError> {
        self.faults.check(operation)?;
        let state = self.state();
        if !state.session_active {
            return Err(SensorError::deactivated("sensor session is not active"));
        }
        if !state.capability_enabled {
            return Err(SensorError::capability_disabled("motion data is disabled"));
        }
        Ok(())
    }
}

#[async_trait]
impl StepSource for MemorySource {
    fn kind(&self) -> SourceKind {
        SourceKind::Memory
    }

    async fn is_supported(&self) -> bool {
        self.supported
    }

    async fn get_default(&self) -> Result<SensorHandle, SensorError> {
        if !self.supported {
            return Err(SensorError::unsupported("device has no step counter"));
        }
        Ok(SensorHandle::new(SourceKind::Memory))
    }

    async fn activate(&self, _handle: &SensorHandle) -> Result<(), SensorError> {
        self.probe.record_activation();
        self.simulate_latency().await;
        let mut state = self.state();
        if !state.capability_enabled {
            return Err(SensorError::capability_disabled("motion data is disabled"));
        }
        state.session_active = true;
        Ok(())
    }

    async fn deactivate(&self, _handle: &SensorHandle) {
        self.probe.record_deactivation();
        self.state().session_active = false;
    }

    async fn current_reading(&self, _handle: &SensorHandle) -> Result<StepSnapshot, SensorError> {
        let _call = self.probe.enter();
        self.simulate_latency().await;
        self.check_readable("current_reading")?;

        let now = self.clock.now();
        let state = self.state();
        Ok(StepSnapshot::new(now, state.walking, state.running).with_unknown(state.unknown))
    }

    async fn reading_history(
        &self,
        _handle: &SensorHandle,
        start: DateTime<Utc>,
        duration: Duration,
    ) -> Result<Vec<StepSnapshot>, SensorError> {
        let _call = self.probe.enter();
        self.simulate_latency().await;
        self.check_readable("reading_history")?;

        let end = start + duration;
        let now = self.clock.now();
        let state = self.state();
        Ok(state
            .history
            .iter()
            .filter(|s| s.timestamp >= start && s.timestamp < end && s.timestamp <= now)
            .copied()
            .collect())
    }
}
