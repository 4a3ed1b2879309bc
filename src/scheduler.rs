//! A cooperative, single-task periodic runner.
//!
//! Re-expressed from a scheduled-service framework (`runOneIteration` plus a
//! custom `Schedule`) as a single loop that asks its driven [`Iteration`] for
//! the next delay after each tick. This keeps cancellation explicit: `stop`
//! wakes the sleeping task directly rather than going through a framework's
//! shutdown hook.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// A single step of periodic work, driven by [`Scheduler`].
///
/// `tick` is never called concurrently with itself; the scheduler awaits
/// completion of one call before computing the sleep for the next.
#[async_trait]
pub(crate) trait Iteration: Send {
    /// The error an iteration can fail with. Expected, handled outcomes
    /// (e.g. a lease version conflict) should be absorbed into the returned
    /// delay rather than raised here; `Err` is for failures the iteration
    /// could not itself schedule a meaningful retry for.
    type Error: std::fmt::Display + Send + 'static;

    /// Runs one iteration and returns the delay before the next one.
    async fn tick(&mut self) -> Result<Duration, Self::Error>;

    /// Called exactly once, after the scheduler has been asked to stop and
    /// any in-flight tick has completed, before the scheduler task exits.
    async fn on_stop(&mut self);
}

/// Retry delay used after a logged iteration failure. Deliberately short and
/// independent of whatever period-specific backoff the failed iteration
/// would otherwise have computed, since an iteration that errored couldn't
/// tell the scheduler what to wait for.
const ITERATION_FAILURE_RETRY: Duration = Duration::from_secs(1);

/// Drives an [`Iteration`] on a dedicated task until [`Scheduler::stop`] is
/// called.
#[derive(Debug)]
pub(crate) struct Scheduler {
    cancel: Arc<Notify>,
    task: Option<JoinHandle<()>>,
}

impl Scheduler {
    /// Spawns `iteration` onto its own task and begins driving it
    /// immediately.
    pub(crate) fn spawn<T>(mut iteration: T) -> Self
    where
        T: Iteration + 'static,
    {
        let cancel = Arc::new(Notify::new());
        let cancel_for_task = cancel.clone();

        let task = tokio::spawn(async move {
            loop {
                let delay = match iteration.tick().await {
                    Ok(delay) => delay,
                    Err(e) => {
                        tracing::warn!(error = %e, "scheduler iteration failed; retrying");
                        ITERATION_FAILURE_RETRY
                    }
                };
                tokio::select! {
                    biased;
                    _ = cancel_for_task.notified() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            iteration.on_stop().await;
        });

        Self {
            cancel,
            task: Some(task),
        }
    }

    /// Cancels the current sleep and waits for the in-flight iteration (and
    /// its `on_stop` hook) to complete.
    pub(crate) async fn stop(mut self) {
        self.cancel.notify_one();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingIteration {
        ticks: Arc<AtomicUsize>,
        stopped: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Iteration for CountingIteration {
        type Error = std::convert::Infallible;

        async fn tick(&mut self) -> Result<Duration, Self::Error> {
            self.ticks.fetch_add(1, Ordering::SeqCst);
            Ok(Duration::from_millis(5))
        }

        async fn on_stop(&mut self) {
            self.stopped.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_until_stopped() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let stopped = Arc::new(AtomicUsize::new(0));
        let scheduler = Scheduler::spawn(CountingIteration {
            ticks: ticks.clone(),
            stopped: stopped.clone(),
        });

        for _ in 0..3 {
            tokio::time::advance(Duration::from_millis(5)).await;
            tokio::task::yield_now().await;
        }
        scheduler.stop().await;

        assert!(ticks.load(Ordering::SeqCst) >= 2);
        assert_eq!(stopped.load(Ordering::SeqCst), 1);
    }

    #[derive(Debug, thiserror::Error)]
    #[error("boom")]
    struct BoomError;

    struct FlakyIteration {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Iteration for FlakyIteration {
        type Error = BoomError;

        async fn tick(&mut self) -> Result<Duration, Self::Error> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call == 0 {
                Err(BoomError)
            } else {
                Ok(Duration::from_millis(5))
            }
        }

        async fn on_stop(&mut self) {}
    }

    #[tokio::test(start_paused = true)]
    async fn retries_after_iteration_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let scheduler = Scheduler::spawn(FlakyIteration {
            calls: calls.clone(),
        });

        // The failing first tick falls back to ITERATION_FAILURE_RETRY
        // rather than hanging or busy-looping.
        tokio::time::advance(ITERATION_FAILURE_RETRY).await;
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }

        assert!(calls.load(Ordering::SeqCst) >= 2);
        scheduler.stop().await;
    }
}
