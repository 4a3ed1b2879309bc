//! Command-line configuration for the lease-based master election loop.

use crate::controller::LeaseManagerConfig;
use crate::identity::{self, IdentityError};
use crate::log::{InvalidLogFormat, LogFormat};

/// Command-line arguments for the lease controller and its ambient stack.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "clap", derive(clap::Parser))]
pub struct LeaseArgs {
    /// The lease duration in milliseconds.
    #[cfg_attr(
        feature = "clap",
        clap(long, env = "TSO_LEASE_PERIOD_MS", default_value_t = 10_000)
    )]
    pub lease_period_ms: u64,

    /// The coordination-service path backing the LEASE record.
    #[cfg_attr(
        feature = "clap",
        clap(long, env = "TSO_LEASE_PATH", default_value = "/omid/tso-lease")
    )]
    pub lease_path: String,

    /// The coordination-service path backing the CURRENT-TSO record.
    #[cfg_attr(
        feature = "clap",
        clap(
            long,
            env = "TSO_CURRENT_TSO_PATH",
            default_value = "/omid/current-tso"
        )
    )]
    pub current_tso_path: String,

    /// The network interface this replica advertises its identity on.
    #[cfg_attr(feature = "clap", clap(long, env = "TSO_NETWORK_INTERFACE"))]
    pub network_interface_name: String,

    /// The port this replica serves on, published alongside its host in
    /// LEASE and CURRENT.
    #[cfg_attr(feature = "clap", clap(long, env = "TSO_PORT", default_value_t = 9_090))]
    pub port: u16,

    /// The Kubernetes namespace holding the LEASE and CURRENT ConfigMaps.
    #[cfg_attr(
        feature = "clap",
        clap(long, env = "TSO_NAMESPACE", default_value = "default")
    )]
    pub namespace: String,

    /// The `tracing` filter directive (e.g. `info`, `tso_lease=debug`).
    #[cfg_attr(
        feature = "clap",
        clap(long, env = "RUST_LOG", default_value = "info")
    )]
    pub log_level: String,

    /// The log output format: `plain` or `json`.
    #[cfg_attr(
        feature = "clap",
        clap(long, env = "TSO_LOG_FORMAT", default_value = "plain")
    )]
    pub log_format: String,
}

/// Indicates the command-line arguments could not be turned into a running
/// configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The named network interface could not be resolved to an address.
    #[error(transparent)]
    Identity(#[from] IdentityError),

    /// `--log-format` was neither `plain` nor `json`.
    #[error(transparent)]
    LogFormat(#[from] InvalidLogFormat),
}

impl LeaseArgs {
    /// Resolves this replica's identity and builds a [`LeaseManagerConfig`].
    pub fn lease_manager_config(&self) -> Result<LeaseManagerConfig, ConfigError> {
        let host_and_port = identity::host_and_port(&self.network_interface_name, self.port)?;
        Ok(LeaseManagerConfig {
            lease_period_ms: self.lease_period_ms,
            lease_path: self.lease_path.clone(),
            current_tso_path: self.current_tso_path.clone(),
            host_and_port,
        })
    }

    /// Parses the configured log format.
    pub fn log_format(&self) -> Result<LogFormat, ConfigError> {
        self.log_format.parse().map_err(ConfigError::from)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn args() -> LeaseArgs {
        LeaseArgs {
            lease_period_ms: 10_000,
            lease_path: "/omid/tso-lease".to_string(),
            current_tso_path: "/omid/current-tso".to_string(),
            network_interface_name: "nonexistent0".to_string(),
            port: 9_090,
            namespace: "default".to_string(),
            log_level: "info".to_string(),
            log_format: "plain".to_string(),
        }
    }

    #[test]
    fn rejects_unresolvable_interface() {
        assert!(matches!(
            args().lease_manager_config(),
            Err(ConfigError::Identity(IdentityError::InterfaceNotFound(_)))
        ));
    }

    #[test]
    fn rejects_invalid_log_format() {
        let mut a = args();
        a.log_format = "xml".to_string();
        assert!(matches!(a.log_format(), Err(ConfigError::LogFormat(_))));
    }

    #[test]
    fn accepts_plain_log_format() {
        assert!(matches!(args().log_format(), Ok(LogFormat::Plain)));
    }
}
