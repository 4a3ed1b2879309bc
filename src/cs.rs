//! The coordination-service gateway: a thin adaptor over a hierarchical,
//! versioned namespace supporting compare-and-swap writes.
//!
//! The gateway never retries. A [`CsError::VersionMismatch`] is a normal,
//! expected outcome (another replica holds the lease); a
//! [`CsError::Transport`] is surfaced to the scheduler as an iteration
//! failure and retried on the next tick.

use async_trait::async_trait;

/// A versioned record read from the coordination service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    /// The raw payload bytes.
    pub payload: Vec<u8>,
    /// The version stamp, stable and monotonic per path.
    pub version: i64,
}

/// Indicates an error interacting with the coordination service.
#[derive(Debug, thiserror::Error)]
pub enum CsError {
    /// The write's precondition did not match the stored version; another
    /// writer updated the record first.
    #[error("version mismatch on write")]
    VersionMismatch,

    /// The path does not exist.
    #[error("path not found")]
    NotFound,

    /// A transport-level failure (network, deadline, serialisation). The
    /// caller should treat this as transient and retry later.
    #[error("coordination service transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// `ensure_path` could not confirm the path exists after creating it.
    #[error("failed to confirm path {0:?} exists")]
    EnsureFailed(String),
}

impl From<&str> for CsError {
    fn from(s: &str) -> Self {
        CsError::Transport(s.into())
    }
}

/// The coordination-service client contract relied upon by the lease
/// controller.
///
/// Implementations MUST NOT retry internally; the controller owns retry
/// timing (see the scheduler's next-fire computation).
#[async_trait]
pub trait CoordinationClient: Send + Sync + std::fmt::Debug {
    /// Idempotently creates `path` (and any intermediate path components) if
    /// it does not already exist. Succeeds without modification if the path
    /// already exists.
    async fn ensure_path(&self, path: &str) -> Result<(), CsError>;

    /// Reads the current payload and version at `path`.
    async fn read(&self, path: &str) -> Result<Record, CsError>;

    /// Writes `payload` to `path`, succeeding only if the stored version
    /// still equals `expected_version`. Returns the new version on success.
    async fn cas_write(
        &self,
        path: &str,
        payload: &[u8],
        expected_version: i64,
    ) -> Result<i64, CsError>;
}
