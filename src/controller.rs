//! The lease state machine: acquire, renew, lose, and — on first acquisition
//! — trigger the promotion job that initialises TSO state and publishes
//! this replica's coordinates.

use crate::clock::Clock;
use crate::cs::{CoordinationClient, CsError};
use crate::initializer::{AsyncInitializer, PromotionError};
use crate::panicker::Panicker;
use crate::scheduler::{Iteration, Scheduler};
use crate::state::StateManager;
use crate::view::{EndLeaseHandle, LeaseView};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// The error an iteration of the control loop can fail with, surfaced to
/// the scheduler so it can log and retry rather than silently swallowing
/// the failure. Expected, handled outcomes (a lease conflict, a renewal
/// that arrives too late) are absorbed into the next-fire delay instead and
/// never reach this type.
#[derive(Debug, thiserror::Error)]
pub enum LeaseManagerError {
    /// A coordination-service call failed in a way the controller could not
    /// itself recover from within this tick.
    #[error(transparent)]
    Cs(#[from] CsError),
    /// Submitting the promotion job to the background worker failed.
    #[error(transparent)]
    Promotion(#[from] PromotionError),
}

/// Configuration for a [`LeaseManager`].
#[derive(Clone, Debug)]
pub struct LeaseManagerConfig {
    /// The lease duration, and the base unit next-fire delays are computed
    /// from. Must be positive.
    pub lease_period_ms: u64,
    /// The coordination-service path backing the LEASE record.
    pub lease_path: String,
    /// The coordination-service path backing the CURRENT-TSO record.
    pub current_tso_path: String,
    /// This replica's `host:port` identity.
    pub host_and_port: String,
}

impl LeaseManagerConfig {
    /// The suggested default LEASE path.
    pub const DEFAULT_LEASE_PATH: &'static str = "/omid/tso-lease";
    /// The suggested default CURRENT path.
    pub const DEFAULT_CURRENT_TSO_PATH: &'static str = "/omid/current-tso";

    fn guard_millis(&self) -> i64 {
        self.lease_period_ms as i64 / 4
    }
}

/// Indicates `start()` could not confirm LEASE and CURRENT exist.
#[derive(Debug, thiserror::Error)]
pub enum LeaseSetupError {
    /// Failed to ensure the LEASE path exists.
    #[error("failed to ensure LEASE path exists: {0}")]
    Lease(#[source] CsError),
    /// Failed to ensure the CURRENT path exists.
    #[error("failed to ensure CURRENT path exists: {0}")]
    Current(#[source] CsError),
}

/// A not-yet-started lease manager.
///
/// Construct with [`LeaseManager::new`], then call [`LeaseManager::start`]
/// to begin the control loop.
#[derive(Debug)]
pub struct LeaseManager {
    cs: Arc<dyn CoordinationClient>,
    clock: Arc<dyn Clock>,
    state_manager: Arc<dyn StateManager>,
    panicker: Arc<dyn Panicker>,
    config: LeaseManagerConfig,
}

impl LeaseManager {
    /// Builds a lease manager from its collaborators.
    pub fn new(
        cs: Arc<dyn CoordinationClient>,
        clock: Arc<dyn Clock>,
        state_manager: Arc<dyn StateManager>,
        panicker: Arc<dyn Panicker>,
        config: LeaseManagerConfig,
    ) -> Self {
        Self {
            cs,
            clock,
            state_manager,
            panicker,
            config,
        }
    }

    /// Ensures LEASE and CURRENT exist, then starts the control loop.
    ///
    /// Returns a handle to stop the loop and a [`LeaseView`] the serving
    /// path can consult via `in_lease_period()`.
    pub async fn start(self) -> Result<(RunningLeaseManager, LeaseView), LeaseSetupError> {
        self.cs
            .ensure_path(&self.config.lease_path)
            .await
            .map_err(LeaseSetupError::Lease)?;
        self.cs
            .ensure_path(&self.config.current_tso_path)
            .await
            .map_err(LeaseSetupError::Current)?;

        let initial_version = match self.cs.read(&self.config.lease_path).await {
            Ok(rec) => rec.version,
            Err(CsError::NotFound) => 0,
            Err(e) => return Err(LeaseSetupError::Lease(e)),
        };

        let view = LeaseView::new(self.clock.clone());
        let end_lease = view.handle();

        let controller = Controller {
            cs: self.cs,
            clock: self.clock,
            state_manager: self.state_manager,
            panicker: self.panicker.clone(),
            config: self.config,
            known_lease_version: initial_version,
            end_lease,
            initializer: Some(AsyncInitializer::spawn(self.panicker)),
        };

        let scheduler = Scheduler::spawn(controller);
        Ok((RunningLeaseManager { scheduler }, view))
    }
}

/// A handle to a running [`LeaseManager`].
#[derive(Debug)]
pub struct RunningLeaseManager {
    scheduler: Scheduler,
}

impl RunningLeaseManager {
    /// Requests scheduler termination and waits for the in-flight iteration,
    /// and the async initialiser's drain, to complete.
    pub async fn stop(self) {
        self.scheduler.stop().await;
    }
}

/// The state machine driven by the [`Scheduler`].
#[derive(Debug)]
struct Controller {
    cs: Arc<dyn CoordinationClient>,
    clock: Arc<dyn Clock>,
    state_manager: Arc<dyn StateManager>,
    panicker: Arc<dyn Panicker>,
    config: LeaseManagerConfig,
    known_lease_version: i64,
    end_lease: EndLeaseHandle,
    initializer: Option<AsyncInitializer>,
}

#[async_trait]
impl Iteration for Controller {
    type Error = LeaseManagerError;

    async fn tick(&mut self) -> Result<Duration, Self::Error> {
        let currently_master =
            self.end_lease.get() != 0 && self.clock.now_millis() <= self.end_lease.get();

        if currently_master {
            self.try_renew().await
        } else {
            self.try_acquire().await
        }
    }

    async fn on_stop(&mut self) {
        if let Some(initializer) = self.initializer.take() {
            let drained = initializer
                .drain(Duration::from_millis(self.config.lease_period_ms))
                .await;
            if !drained {
                self.panicker.panic(
                    "async initialiser failed to drain within one lease period",
                    None,
                );
            }
        }
    }
}

impl Controller {
    async fn try_acquire(&mut self) -> Result<Duration, LeaseManagerError> {
        let base_time = self.clock.now_millis();
        match self
            .cs
            .cas_write(
                &self.config.lease_path,
                self.config.host_and_port.as_bytes(),
                self.known_lease_version,
            )
            .await
        {
            Ok(new_version) => {
                self.known_lease_version = new_version;
                let end = base_time + self.config.lease_period_ms as i64;
                self.end_lease.set(end);
                tracing::info!(end_lease_millis = end, "acquired lease");
                self.submit_promotion().await?;
                Ok(self.next_fire_master(end))
            }
            Err(CsError::VersionMismatch) => Ok(self.next_fire_not_master().await),
            Err(e) => Err(LeaseManagerError::Cs(e)),
        }
    }

    async fn try_renew(&mut self) -> Result<Duration, LeaseManagerError> {
        let base_time = self.clock.now_millis();
        match self
            .cs
            .cas_write(
                &self.config.lease_path,
                self.config.host_and_port.as_bytes(),
                self.known_lease_version,
            )
            .await
        {
            Ok(new_version) => {
                self.known_lease_version = new_version;
                if self.clock.now_millis() <= self.end_lease.get() {
                    let end = base_time + self.config.lease_period_ms as i64;
                    self.end_lease.set(end);
                    Ok(self.next_fire_master(end))
                } else {
                    tracing::warn!(
                        "lease renewed but the local deadline had already passed; demoting"
                    );
                    self.end_lease.set(0);
                    Ok(self.next_fire_not_master().await)
                }
            }
            Err(CsError::VersionMismatch) => {
                tracing::warn!("lease version mismatch on renewal; another replica acquired it");
                self.end_lease.set(0);
                Ok(self.next_fire_not_master().await)
            }
            // endLeaseMs is deliberately left untouched: a transport failure
            // doesn't prove the lease was lost, and the scheduler will retry
            // well before the current window expires.
            Err(e) => Err(LeaseManagerError::Cs(e)),
        }
    }

    /// NotMaster next-fire: refresh `knownLeaseVersion` from a plain read,
    /// then schedule a retry after one full lease period regardless of
    /// whether the refresh succeeded.
    async fn next_fire_not_master(&mut self) -> Duration {
        match self.cs.read(&self.config.lease_path).await {
            Ok(rec) => self.known_lease_version = rec.version,
            Err(e) => {
                tracing::debug!(error = %e, "failed to refresh lease version; will retry next tick")
            }
        }
        Duration::from_millis(self.config.lease_period_ms)
    }

    /// Master next-fire: `endLeaseMs - now - guardMs`, floored at zero.
    fn next_fire_master(&self, end_lease_millis: i64) -> Duration {
        let now = self.clock.now_millis();
        let delay = end_lease_millis - now - self.config.guard_millis();
        Duration::from_millis(delay.max(0) as u64)
    }

    async fn submit_promotion(&mut self) -> Result<(), PromotionError> {
        let Some(initializer) = self.initializer.as_ref() else {
            return Ok(());
        };
        let cs = self.cs.clone();
        let state_manager = self.state_manager.clone();
        let config = self.config.clone();
        let job = async move { run_promotion(cs, state_manager, config).await };
        initializer.submit(job).await
    }
}

async fn run_promotion(
    cs: Arc<dyn CoordinationClient>,
    state_manager: Arc<dyn StateManager>,
    config: LeaseManagerConfig,
) -> Result<(), PromotionError> {
    let new_state = state_manager
        .reset()
        .await
        .map_err(|e| PromotionError::new("state collaborator reset failed", Some(Box::new(e))))?;

    let current = cs.read(&config.current_tso_path).await.map_err(|e| {
        PromotionError::new("failed to read CURRENT before publishing", Some(Box::new(e)))
    })?;

    let prev_epoch = if current.payload.is_empty() {
        None
    } else {
        let text = String::from_utf8(current.payload.clone()).map_err(|e| {
            PromotionError::new("CURRENT payload is not valid UTF-8", Some(Box::new(e)))
        })?;
        let (_, epoch) = parse_current(&text).ok_or_else(|| {
            PromotionError::new(format!("malformed CURRENT payload: {text:?}"), None)
        })?;
        Some(epoch)
    };

    if let Some(prev_epoch) = prev_epoch {
        if prev_epoch >= new_state.epoch {
            return Err(PromotionError::new(
                format!(
                    "epoch regression: previous epoch {prev_epoch} >= newly minted epoch {}",
                    new_state.epoch
                ),
                None,
            ));
        }
    }

    let payload = format!("{}#{}", config.host_and_port, new_state.epoch);
    match cs
        .cas_write(&config.current_tso_path, payload.as_bytes(), current.version)
        .await
    {
        Ok(_) => {
            tracing::info!(epoch = new_state.epoch, "published CURRENT");
            Ok(())
        }
        Err(CsError::VersionMismatch) => Err(PromotionError::new(
            "split brain: CURRENT was updated concurrently by another replica",
            None,
        )),
        Err(e) => Err(PromotionError::new("failed to write CURRENT", Some(Box::new(e)))),
    }
}

/// Parses a CURRENT payload of the form `"<host:port>#<epoch>"`.
///
/// Returns `None` for anything that does not have exactly one `#` separator,
/// contains whitespace, or whose epoch is not a non-negative decimal
/// integer.
fn parse_current(text: &str) -> Option<(&str, i64)> {
    if text.is_empty() || text.chars().any(char::is_whitespace) {
        return None;
    }
    let mut parts = text.splitn(2, '#');
    let holder = parts.next()?;
    let rest = parts.next()?;
    if holder.is_empty() || rest.contains('#') {
        return None;
    }
    let epoch: i64 = rest.parse().ok()?;
    if epoch < 0 {
        return None;
    }
    Some((holder, epoch))
}
