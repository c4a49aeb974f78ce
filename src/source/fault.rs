//! Fault injection and call accounting for simulated sources

use crate::error::{SensorError, SensorErrorKind};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Scripted failures for sensor data calls.
///
/// Queued faults are consumed one per call; a sticky fault fails every call
/// until cleared.
#[derive(Debug, Default)]
pub struct FaultPlan {
    queued: Mutex<VecDeque<SensorErrorKind>>,
    sticky: Mutex<Option<SensorErrorKind>>,
}

impl FaultPlan {
    /// Fail the next `times` calls with `kind`
    pub fn fail_next(&self, kind: SensorErrorKind, times: usize) {
        let mut queued = self.queued.lock().unwrap_or_else(|e| e.into_inner());
        queued.extend(std::iter::repeat(kind).take(times));
    }

    /// Fail every call with `kind` until `clear` is called
    pub fn fail_always(&self, kind: SensorErrorKind) {
        *self.sticky.lock().unwrap_or_else(|e| e.into_inner()) = Some(kind);
    }

    pub fn clear(&self) {
        self.queued
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        *self.sticky.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Next scripted failure for `operation`, if any
    pub fn check(&self, operation: &str) -> Result<(), SensorError> {
        if let Some(kind) = *self.sticky.lock().unwrap_or_else(|e| e.into_inner()) {
            return Err(SensorError::new(kind, format!("injected fault in {operation}")));
        }
        let next = self
            .queued
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        match next {
            Some(kind) => Err(SensorError::new(kind, format!("injected fault in {operation}"))),
            None => Ok(()),
        }
    }
}

/// Counts sensor calls and tracks how many run at once
#[derive(Debug, Default)]
pub struct CallProbe {
    activations: AtomicUsize,
    deactivations: AtomicUsize,
    reads: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl CallProbe {
    pub fn record_activation(&self) {
        self.activations.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_deactivation(&self) {
        self.deactivations.fetch_add(1, Ordering::SeqCst);
    }

    /// Mark a data call as started; the guard marks it finished on drop
    pub fn enter(&self) -> InFlightGuard<'_> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlightGuard { probe: self }
    }

    pub fn activations(&self) -> usize {
        self.activations.load(Ordering::SeqCst)
    }

    pub fn deactivations(&self) -> usize {
        self.deactivations.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Highest number of data calls observed running concurrently
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

pub struct InFlightGuard<'a> {
    probe: &'a CallProbe,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.probe.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queued_faults_are_consumed_in_order() {
        let plan = FaultPlan::default();
        plan.fail_next(SensorErrorKind::SensorDeactivated, 1);
        plan.fail_next(SensorErrorKind::Unknown, 1);

        assert_eq!(
            plan.check("read").unwrap_err().kind(),
            SensorErrorKind::SensorDeactivated
        );
        assert_eq!(plan.check("read").unwrap_err().kind(), SensorErrorKind::Unknown);
        assert!(plan.check("read").is_ok());
    }

    #[test]
    fn test_sticky_fault_until_cleared() {
        let plan = FaultPlan::default();
        plan.fail_always(SensorErrorKind::CapabilityDisabled);

        assert!(plan.check("read").is_err());
        assert!(plan.check("read").is_err());

        plan.clear();
        assert!(plan.check("read").is_ok());
    }

    #[test]
    fn test_probe_tracks_concurrency() {
        let probe = CallProbe::default();
        {
            let _a = probe.enter();
            let _b = probe.enter();
        }
        let _c = probe.enter();

        assert_eq!(probe.reads(), 3);
        assert_eq!(probe.max_in_flight(), 2);
    }
}
