//! Daemon wiring: one task per long-lived component.
//!
//! The reaper, guardian, and probe supervisor never talk to each other;
//! each holds its own handles and reacts to the shared shutdown signal.
//! `run` returns once every task has drained, so in-flight batches and
//! transactions complete before the process exits.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::config::Config;
use crate::error::Result;
use crate::guardian::ConsistencyGuardian;
use crate::inventory::{ScanReportInventory, ServiceInventory};
use crate::notify::{LogChannel, NotificationChannel};
use crate::probe::SpeedProbeSupervisor;
use crate::reaper::StaleTransferReaper;
use crate::shutdown::Shutdown;
use crate::storage::TransferStore;

/// Open the store and run all components until `shutdown` is signalled.
pub async fn run(config: &Config, shutdown: Arc<Shutdown>) -> Result<()> {
    let channel: Arc<dyn NotificationChannel> = Arc::new(LogChannel);
    run_with_channel(config, shutdown, channel).await
}

/// As [`run`], with an explicit notification channel.
pub async fn run_with_channel(
    config: &Config,
    shutdown: Arc<Shutdown>,
    channel: Arc<dyn NotificationChannel>,
) -> Result<()> {
    let store = Arc::new(TransferStore::open(&config.general.store_path)?);
    info!(store = %config.general.store_path.display(), "Transfer store opened");

    let inventory: Arc<dyn ServiceInventory> = Arc::new(ScanReportInventory::new(
        config.scan_report_path(),
        Duration::from_secs(config.guardian.inventory_ttl_secs),
    ));

    let reaper = StaleTransferReaper::new(Arc::clone(&store), config.reaper.clone());
    let guardian = ConsistencyGuardian::new(
        Arc::clone(&store),
        inventory,
        config.datasources.clone(),
        config.guardian.clone(),
    );
    let supervisor = Arc::new(SpeedProbeSupervisor::new(
        config.probe.clone(),
        config.general.store_path.clone(),
        &config.datasources,
        channel,
    ));

    let tasks = [
        ("reaper", tokio::spawn(reaper.run(Arc::clone(&shutdown)))),
        ("guardian", tokio::spawn(guardian.run(Arc::clone(&shutdown)))),
        (
            "probe-supervisor",
            tokio::spawn(supervisor.run(Arc::clone(&shutdown))),
        ),
    ];

    for (name, task) in tasks {
        if let Err(e) = task.await {
            error!(task = name, error = %e, "Background task panicked");
        }
    }

    info!("Daemon stopped");
    Ok(())
}
