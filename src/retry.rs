//! Recovery from lapsed sensor sessions
//!
//! A sensor call that fails with `SensorDeactivated` gets exactly one
//! reactivation followed by exactly one retry. Every other failure, and any
//! failure after the retry, is returned to the caller unchanged.

use crate::error::SensorError;
use crate::source::StepSource;
use crate::types::{SensorHandle, StepSnapshot};
use chrono::{DateTime, Duration, Utc};
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};

/// Run `attempt`, reactivating and retrying once on `SensorDeactivated`
pub async fn with_recovery<T, F, Fut>(
    source: &dyn StepSource,
    handle: &SensorHandle,
    operation: &str,
    mut attempt: F,
) -> Result<T, SensorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SensorError>>,
{
    match attempt().await {
        Ok(value) => Ok(value),
        Err(err) if err.kind().is_transient() => {
            tracing::warn!(operation, error = %err, "sensor deactivated, reactivating once");
            if let Err(activation) = source.activate(handle).await {
                tracing::warn!(operation, error = %activation, "reactivation failed");
                return Err(activation);
            }
            attempt().await.map_err(|retry| {
                tracing::warn!(operation, error = %retry, "retry after reactivation failed");
                retry
            })
        }
        Err(err) => {
            tracing::debug!(operation, kind = err.kind().as_str(), "terminal sensor failure");
            Err(err)
        }
    }
}

/// Sensor reads routed through `with_recovery`
pub struct Recovering<'a> {
    source: &'a dyn StepSource,
    handle: &'a SensorHandle,
    reactivations: AtomicU32,
}

impl<'a> Recovering<'a> {
    pub fn new(source: &'a dyn StepSource, handle: &'a SensorHandle) -> Self {
        Self {
            source,
            handle,
            reactivations: AtomicU32::new(0),
        }
    }

    pub async fn current_reading(&self) -> Result<StepSnapshot, SensorError> {
        self.run("current_reading", || self.source.current_reading(self.handle))
            .await
    }

    pub async fn reading_history(
        &self,
        start: DateTime<Utc>,
        duration: Duration,
    ) -> Result<Vec<StepSnapshot>, SensorError> {
        self.run("reading_history", || {
            self.source.reading_history(self.handle, start, duration)
        })
        .await
    }

    /// Calls that were retried after a successful reactivation
    pub fn reactivations(&self) -> u32 {
        self.reactivations.load(Ordering::SeqCst)
    }

    async fn run<T, F, Fut>(&self, operation: &str, attempt: F) -> Result<T, SensorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SensorError>>,
    {
        let mut attempts = 0u32;
        let mut attempt = attempt;
        let result = with_recovery(self.source, self.handle, operation, || {
            attempts += 1;
            attempt()
        })
        .await;
        if attempts > 1 {
            self.reactivations.fetch_add(1, Ordering::SeqCst);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::SensorErrorKind;
    use crate::source::MemorySource;
    use chrono::TimeZone;
    use std::sync::Arc;

    async fn active_source() -> (MemorySource, SensorHandle) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap(),
        ));
        let source = MemorySource::new(clock);
        let handle = source.get_default().await.unwrap();
        source.activate(&handle).await.unwrap();
        source.record(120, 30);
        (source, handle)
    }

    #[tokio::test]
    async fn test_single_deactivation_recovers_with_one_reactivation() {
        let (source, handle) = active_source().await;
        source.faults().fail_next(SensorErrorKind::SensorDeactivated, 1);

        let reading = Recovering::new(&source, &handle);
        let snapshot = reading.current_reading().await.unwrap();

        assert_eq!(snapshot.walking, 120);
        assert_eq!(reading.reactivations(), 1);
        // initial activation plus the recovery
        assert_eq!(source.probe().activations(), 2);
        assert_eq!(source.probe().reads(), 2);
    }

    #[tokio::test]
    async fn test_persistent_deactivation_is_terminal_after_one_retry() {
        let (source, handle) = active_source().await;
        source.faults().fail_always(SensorErrorKind::SensorDeactivated);

        let reading = Recovering::new(&source, &handle);
        let err = reading.current_reading().await.unwrap_err();

        assert_eq!(err.kind(), SensorErrorKind::SensorDeactivated);
        assert_eq!(reading.reactivations(), 1);
        assert_eq!(source.probe().activations(), 2);
        assert_eq!(source.probe().reads(), 2);
    }

    #[tokio::test]
    async fn test_other_kinds_are_not_retried() {
        let (source, handle) = active_source().await;
        source.faults().fail_next(SensorErrorKind::CapabilityDisabled, 1);

        let reading = Recovering::new(&source, &handle);
        let err = reading.current_reading().await.unwrap_err();

        assert_eq!(err.kind(), SensorErrorKind::CapabilityDisabled);
        assert_eq!(reading.reactivations(), 0);
        assert_eq!(source.probe().reads(), 1);
    }

    #[tokio::test]
    async fn test_lapsed_session_is_reactivated() {
        let (source, handle) = active_source().await;
        source.lapse_session();

        let start = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        let history = with_recovery(&source, &handle, "reading_history", || {
            source.reading_history(&handle, start, Duration::days(1))
        })
        .await
        .unwrap();

        assert_eq!(history.len(), 1);
        assert!(source.is_session_active());
    }

    #[tokio::test]
    async fn test_failed_reactivation_is_terminal() {
        let (source, handle) = active_source().await;
        source.lapse_session();
        source.set_capability_enabled(false);

        let err = Recovering::new(&source, &handle)
            .current_reading()
            .await
            .unwrap_err();

        assert_eq!(err.kind(), SensorErrorKind::CapabilityDisabled);
        assert_eq!(source.probe().activations(), 2);
        assert_eq!(source.probe().reads(), 1);
    }
}
