//! The external TSO state engine, out of scope for this crate beyond its
//! `reset()` contract: minting a fresh epoch is the only thing the lease
//! controller needs from it.

use async_trait::async_trait;

/// The state handed back by a successful [`StateManager::reset`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TsoState {
    /// A non-negative epoch uniquely naming this mastership term.
    pub epoch: i64,
}

/// Indicates that the state collaborator could not produce a fresh epoch.
#[derive(Debug, thiserror::Error)]
#[error("state reset failed: {0}")]
pub struct StateResetError(#[source] pub Box<dyn std::error::Error + Send + Sync>);

/// The TSO state engine's interface, as relied upon by the promotion job.
///
/// Real implementations live outside this crate (transaction timestamp
/// bookkeeping, snapshotting, etc); this trait is the seam the lease
/// controller calls through.
#[async_trait]
pub trait StateManager: Send + Sync + std::fmt::Debug {
    /// Resets in-memory TSO state and returns a fresh epoch. May block; may
    /// fail, in which case the promotion job fails without writing CURRENT.
    async fn reset(&self) -> Result<TsoState, StateResetError>;
}

/// A reference `StateManager` that hands out process-local, monotonically
/// increasing epochs.
///
/// Suitable for the demo binary and for tests; a production TSO replaces
/// this with an implementation backed by its actual transaction state.
#[derive(Debug)]
pub struct ResettableEpochState {
    next_epoch: std::sync::atomic::AtomicI64,
}

impl ResettableEpochState {
    /// Creates a state collaborator whose first `reset()` returns
    /// `starting_epoch`.
    pub fn new(starting_epoch: i64) -> Self {
        Self {
            next_epoch: std::sync::atomic::AtomicI64::new(starting_epoch),
        }
    }
}

impl Default for ResettableEpochState {
    fn default() -> Self {
        Self::new(0)
    }
}

#[async_trait]
impl StateManager for ResettableEpochState {
    async fn reset(&self) -> Result<TsoState, StateResetError> {
        let epoch = self
            .next_epoch
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(TsoState { epoch })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn epochs_are_monotonic() {
        let state = ResettableEpochState::new(5);
        assert_eq!(state.reset().await.unwrap().epoch, 5);
        assert_eq!(state.reset().await.unwrap().epoch, 6);
        assert_eq!(state.reset().await.unwrap().epoch, 7);
    }
}
