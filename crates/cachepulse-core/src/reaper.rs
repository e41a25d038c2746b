//! Stale-transfer reaper.
//!
//! Transfers stop being "active" when their last write ages past the quiet
//! threshold. The reaper sweeps in bounded batches so write locks stay
//! short while the ingestion path is still writing, pausing briefly between
//! full batches. A tick keeps draining until a batch comes back short, so
//! there is no upper bound on rows finalized per tick.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::config::ReaperConfig;
use crate::error::Result;
use crate::shutdown::Shutdown;
use crate::storage::{now_ms, TransferStore};

/// Summary of a single reaper tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Rows finalized per batch, in order.
    pub batches: Vec<usize>,
}

impl TickReport {
    #[must_use]
    pub fn finalized(&self) -> usize {
        self.batches.iter().sum()
    }
}

/// Periodic sweep that finalizes quiet transfers.
pub struct StaleTransferReaper {
    store: Arc<TransferStore>,
    config: ReaperConfig,
}

impl StaleTransferReaper {
    #[must_use]
    pub fn new(store: Arc<TransferStore>, config: ReaperConfig) -> Self {
        Self { store, config }
    }

    /// Run the reaper loop until `shutdown` is signalled.
    pub async fn run(self, shutdown: Arc<Shutdown>) {
        info!(
            interval_secs = self.config.interval_secs,
            quiet_threshold_secs = self.config.quiet_threshold_secs,
            batch_size = self.config.batch_size,
            "Stale-transfer reaper started"
        );

        // Boot corrections run exactly once, before the steady-state sweep.
        match self.startup_corrections(&shutdown).await {
            Ok((invalid, report)) => {
                if invalid > 0 || report.finalized() > 0 {
                    info!(
                        invalid_app_rows = invalid,
                        already_stale = report.finalized(),
                        "Reaper startup corrections applied"
                    );
                }
            }
            Err(e) => error!(error = %e, "Reaper startup corrections failed"),
        }

        let interval = Duration::from_secs(self.config.interval_secs);
        loop {
            tokio::select! {
                () = shutdown.wait() => break,
                () = tokio::time::sleep(interval) => {}
            }
            if shutdown.is_triggered() {
                break;
            }

            match self.tick(&shutdown).await {
                Ok(report) if report.finalized() > 0 => {
                    debug!(
                        finalized = report.finalized(),
                        batches = report.batches.len(),
                        "Reaper tick finalized quiet transfers"
                    );
                }
                Ok(_) => {}
                // Abandon the tick; the scan is idempotent and the next
                // scheduled tick retries from scratch.
                Err(e) => error!(error = %e, "Reaper tick failed"),
            }
        }

        info!("Stale-transfer reaper shutting down");
    }

    /// One-time boot pass: force-deactivate placeholder rows regardless of
    /// age, then finalize anything already stale without waiting a tick.
    pub async fn startup_corrections(&self, shutdown: &Shutdown) -> Result<(usize, TickReport)> {
        let store = Arc::clone(&self.store);
        let invalid = tokio::task::spawn_blocking(move || store.deactivate_invalid_app()).await??;
        let report = self.tick(shutdown).await?;
        Ok((invalid, report))
    }

    /// One full sweep: drain stale active transfers in bounded batches.
    /// Shutdown interrupts the drain after the in-flight batch.
    pub async fn tick(&self, shutdown: &Shutdown) -> Result<TickReport> {
        let cutoff = now_ms() - (self.config.quiet_threshold_secs as i64) * 1_000;
        let batch_size = self.config.batch_size.max(1);
        let pause = Duration::from_millis(self.config.batch_pause_ms);
        let mut report = TickReport::default();

        loop {
            let store = Arc::clone(&self.store);
            let ids = tokio::task::spawn_blocking(move || {
                store.stale_active_ids(cutoff, batch_size)
            })
            .await??;

            if ids.is_empty() {
                break;
            }

            let full = ids.len() == batch_size;
            let store = Arc::clone(&self.store);
            let flipped =
                tokio::task::spawn_blocking(move || store.deactivate(&ids)).await??;
            report.batches.push(flipped);

            if !full {
                break;
            }
            // A full batch signals more rows may remain; yield so other
            // writers get the lock before the next batch. Shutdown wins the
            // race, leaving the remainder to the next daemon start.
            tokio::select! {
                () = shutdown.wait() => break,
                () = tokio::time::sleep(pause) => {}
            }
            if shutdown.is_triggered() {
                break;
            }
        }

        Ok(report)
    }
}
