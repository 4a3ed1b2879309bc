#![forbid(unsafe_code)]

//! A CLI that runs the lease controller standalone, against either an
//! in-memory coordination service or a real Kubernetes cluster.

use anyhow::{bail, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tso_lease::clock::SystemClock;
use tso_lease::config::LeaseArgs;
use tso_lease::cs::CoordinationClient;
use tso_lease::cs_mock::MockCoordinationClient;
use tso_lease::log::LogFilter;
use tso_lease::panicker::AbortingPanicker;
use tso_lease::state::ResettableEpochState;
use tso_lease::LeaseManager;

#[cfg(feature = "kube")]
use tso_lease::client::ClientArgs;

#[derive(Clone, Parser)]
#[clap(version)]
struct Args {
    #[clap(flatten)]
    lease: LeaseArgs,

    #[cfg(feature = "kube")]
    #[clap(flatten)]
    client: ClientArgs,

    /// Run against an in-memory coordination service instead of Kubernetes.
    #[cfg(feature = "kube")]
    #[arg(long)]
    standalone: bool,

    /// How long to run before exiting, in seconds. Runs until Ctrl-C if unset.
    #[arg(long)]
    run_for_secs: Option<u64>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter: LogFilter = args
        .lease
        .log_level
        .parse()
        .unwrap_or_else(|_| LogFilter::from_default_env());
    let format = args.lease.log_format()?;
    format.try_init(filter).ok();

    let config = args.lease.lease_manager_config()?;

    #[cfg(feature = "kube")]
    let cs: Arc<dyn CoordinationClient> = if args.standalone {
        Arc::new(MockCoordinationClient::new())
    } else {
        let client = args.client.try_client().await?;
        Arc::new(tso_lease::cs_kube::KubeConfigMapClient::new(
            client,
            &args.lease.namespace,
            Duration::from_millis(config.lease_period_ms / 2),
        ))
    };
    #[cfg(not(feature = "kube"))]
    let cs: Arc<dyn CoordinationClient> = Arc::new(MockCoordinationClient::new());

    let manager = LeaseManager::new(
        cs,
        Arc::new(SystemClock),
        Arc::new(ResettableEpochState::default()),
        Arc::new(AbortingPanicker),
        config,
    );

    let (running, view) = manager.start().await?;
    tracing::info!(identity = %args.lease.network_interface_name, "lease controller started");

    match args.run_for_secs {
        Some(secs) => {
            tokio::time::sleep(Duration::from_secs(secs)).await;
        }
        None => {
            if tokio::signal::ctrl_c().await.is_err() {
                bail!("failed to install Ctrl-C handler");
            }
        }
    }

    tracing::info!(in_lease_period = view.in_lease_period(), "shutting down");
    running.stop().await;
    Ok(())
}
