//! Recurring refresh task
//!
//! A `Poller` owns one tokio task that invokes its tick callback on a fixed
//! period. Ticks run sequentially inside the task, so they never overlap; a
//! tick that overruns the period causes missed ticks to be skipped rather
//! than bursted.

use std::future::Future;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub struct Poller {
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl Poller {
    /// Start ticking every `period`. The first tick fires one period from
    /// now. The task ends when `tick` resolves to `false`, when `stop` is
    /// called, or when the poller is dropped.
    pub fn spawn<F, Fut>(period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // interval's first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = &mut stop_rx => {
                        tracing::debug!("poller stop requested");
                        break;
                    }
                    _ = ticker.tick() => {
                        if !tick().await {
                            tracing::debug!("poller tick asked to finish");
                            break;
                        }
                    }
                }
            }
        });

        tracing::debug!(period_ms = period.as_millis() as u64, "poller started");
        Self { stop_tx, handle }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Signal the task and wait for an in-flight tick to finish
    pub async fn stop(self) {
        let Poller { stop_tx, handle } = self;
        // the task may already have exited on its own
        let _ = stop_tx.send(());
        if let Err(err) = handle.await {
            if err.is_panic() {
                tracing::warn!(error = %err, "poller task panicked");
            }
        }
    }
}
