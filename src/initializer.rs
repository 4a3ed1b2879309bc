//! A single-threaded work queue that runs the promotion job off the
//! scheduler's task.
//!
//! `stateCollaborator.reset()` may be slow; running it on the scheduler task
//! would block renewals and could cause the lease to lapse exactly when the
//! replica has just won it. This queue has capacity 1 in practice: under
//! correct operation a replica is promoted at most once per lifetime.

use crate::panicker::Panicker;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

type Job = Pin<Box<dyn Future<Output = Result<(), PromotionError>> + Send>>;

/// An error escaping a submitted promotion job, routed to the [`Panicker`]
/// or, for a submission failure, surfaced to the scheduler.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct PromotionError {
    message: String,
    #[source]
    cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl PromotionError {
    /// Builds a job error with an optional underlying cause.
    pub fn new(
        message: impl Into<String>,
        cause: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            message: message.into(),
            cause,
        }
    }
}

/// Submits promotion jobs to a dedicated background task.
#[derive(Debug)]
pub struct AsyncInitializer {
    tx: mpsc::Sender<Job>,
    worker: JoinHandle<()>,
}

impl AsyncInitializer {
    /// Spawns the background worker task.
    pub fn spawn(panicker: Arc<dyn Panicker>) -> Self {
        let (tx, mut rx) = mpsc::channel::<Job>(1);
        let worker = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                if let Err(err) = job.await {
                    panicker.panic("promotion job failed", Some(&err));
                }
            }
        });
        Self { tx, worker }
    }

    /// Submits a promotion job to run on the background task.
    ///
    /// Returns `Err` only if the worker task is gone (e.g. after `drain`),
    /// which should not happen during normal operation.
    pub async fn submit<F>(&self, job: F) -> Result<(), PromotionError>
    where
        F: Future<Output = Result<(), PromotionError>> + Send + 'static,
    {
        self.tx
            .send(Box::pin(job))
            .await
            .map_err(|_| PromotionError::new("initialiser worker has stopped", None))
    }

    /// Closes the submission channel and waits for any in-flight job to
    /// finish, bounded by `timeout`. Returns `false` if the timeout elapsed
    /// first, in which case the caller should escalate to the [`Panicker`].
    pub async fn drain(self, timeout: Duration) -> bool {
        drop(self.tx);
        tokio::time::timeout(timeout, self.worker).await.is_ok()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::panicker::RecordingPanicker;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn runs_submitted_jobs() {
        let panicker = Arc::new(RecordingPanicker::new());
        let init = AsyncInitializer::spawn(panicker.clone());
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        init.submit(async move {
            ran2.store(true, Ordering::SeqCst);
            Ok(())
        })
        .await
        .unwrap();

        assert!(init.drain(Duration::from_secs(1)).await);
        assert!(ran.load(Ordering::SeqCst));
        assert!(!panicker.was_invoked());
    }

    #[tokio::test]
    async fn routes_job_failure_to_panicker() {
        let panicker = Arc::new(RecordingPanicker::new());
        let init = AsyncInitializer::spawn(panicker.clone());
        init.submit(async move { Err(PromotionError::new("boom", None)) })
            .await
            .unwrap();

        assert!(init.drain(Duration::from_secs(1)).await);
        assert!(panicker.was_invoked());
    }
}
