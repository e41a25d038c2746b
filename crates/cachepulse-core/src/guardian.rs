//! Consistency guardian: orphan removal and datasource normalization.
//!
//! Runs on a slow cadence (plus once at startup) and repairs long-term
//! drift between stored transfer metadata and the authoritative log
//! corpus. Orphan removal is destructive and therefore runs behind two
//! safety guards and a single transaction; normalization is a set of
//! self-contained batched updates that tolerate partial completion.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::{Datasource, GuardianConfig};
use crate::error::Result;
use crate::inventory::ServiceInventory;
use crate::shutdown::Shutdown;
use crate::storage::{ServiceRemoval, TransferStore};

/// Outcome of one orphan-removal attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrphanOutcome {
    /// Deletion committed; per-table row counts inside.
    Removed(ServiceRemoval),
    /// The log inventory came back empty — treated as a scanning failure,
    /// never as a legitimate mass-orphan event.
    AbortedEmptyInventory,
    /// Deleting would have removed every known service — treated as a
    /// corrupted inventory.
    AbortedAllOrphaned { orphaned: usize, total: usize },
}

/// Periodic consistency sweep over the transfer store.
pub struct ConsistencyGuardian {
    store: Arc<TransferStore>,
    inventory: Arc<dyn ServiceInventory>,
    datasources: Vec<Datasource>,
    config: GuardianConfig,
}

impl ConsistencyGuardian {
    #[must_use]
    pub fn new(
        store: Arc<TransferStore>,
        inventory: Arc<dyn ServiceInventory>,
        datasources: Vec<Datasource>,
        config: GuardianConfig,
    ) -> Self {
        Self {
            store,
            inventory,
            datasources,
            config,
        }
    }

    /// Run the guardian loop until `shutdown` is signalled. One sweep runs
    /// immediately at startup, then on the configured cadence.
    pub async fn run(self, shutdown: Arc<Shutdown>) {
        info!(
            interval_secs = self.config.interval_secs,
            "Consistency guardian started"
        );

        self.sweep(false).await;

        let interval = Duration::from_secs(self.config.interval_secs);
        loop {
            tokio::select! {
                () = shutdown.wait() => break,
                () = tokio::time::sleep(interval) => {}
            }
            if shutdown.is_triggered() {
                break;
            }
            self.sweep(false).await;
        }

        info!("Consistency guardian shutting down");
    }

    /// One full sweep: orphan removal, then datasource normalization. The
    /// two sub-operations are independent; a failure in one never blocks
    /// the other, and both are retried from scratch next cycle.
    pub async fn sweep(&self, force_refresh: bool) {
        match self.remove_orphans(force_refresh).await {
            Ok(OrphanOutcome::Removed(removal)) if removal.services_removed > 0 => {
                info!(
                    services = removal.services_removed,
                    rows = removal.total_rows(),
                    "Removed orphaned services"
                );
            }
            Ok(OrphanOutcome::Removed(_)) => {}
            Ok(OrphanOutcome::AbortedEmptyInventory) => {
                warn!("Orphan removal aborted: log-service inventory is empty (suspected scan failure)");
            }
            Ok(OrphanOutcome::AbortedAllOrphaned { orphaned, total }) => {
                warn!(
                    orphaned,
                    total,
                    "Orphan removal aborted: deletion would remove every known service"
                );
            }
            Err(e) => error!(error = %e, "Orphan removal failed; rolled back"),
        }

        match self.normalize_datasources().await {
            Ok(rows) if rows > 0 => info!(rows, "Normalized datasource attribution"),
            Ok(_) => {}
            Err(e) => error!(error = %e, "Datasource normalization failed"),
        }
    }

    /// Remove all records for services no longer present in the log corpus.
    ///
    /// Both safety guards are evaluated before any delete statement runs;
    /// the deletes themselves share one transaction that rolls back in full
    /// on any error.
    pub async fn remove_orphans(&self, force_refresh: bool) -> Result<OrphanOutcome> {
        let log_services = self.inventory.service_names(force_refresh)?;
        if log_services.is_empty() {
            return Ok(OrphanOutcome::AbortedEmptyInventory);
        }

        let store = Arc::clone(&self.store);
        let db_services = tokio::task::spawn_blocking(move || store.distinct_services()).await??;

        // Service identity is case-insensitive; fold before comparing so
        // "Steam" and "steam" count as one service.
        let db_folded: HashSet<String> =
            db_services.iter().map(|s| s.to_lowercase()).collect();
        let mut orphaned: Vec<String> = db_folded
            .iter()
            .filter(|service| !log_services.contains(*service))
            .cloned()
            .collect();
        orphaned.sort();

        if orphaned.is_empty() {
            return Ok(OrphanOutcome::Removed(ServiceRemoval::default()));
        }
        if orphaned.len() >= db_folded.len() {
            return Ok(OrphanOutcome::AbortedAllOrphaned {
                orphaned: orphaned.len(),
                total: db_folded.len(),
            });
        }

        debug!(orphaned = ?orphaned, "Deleting orphaned services");
        let store = Arc::clone(&self.store);
        let removal =
            tokio::task::spawn_blocking(move || store.remove_service_data(&orphaned)).await??;
        Ok(OrphanOutcome::Removed(removal))
    }

    /// Rewrite inconsistent datasource-name values to their canonical form.
    /// Returns the total number of rows updated.
    pub async fn normalize_datasources(&self) -> Result<usize> {
        let Some(default) = self.datasources.iter().find(|ds| ds.default) else {
            debug!("No default datasource configured; skipping normalization");
            return Ok(0);
        };

        let store = Arc::clone(&self.store);
        let stored_values =
            tokio::task::spawn_blocking(move || store.distinct_datasources()).await??;

        let mut total = 0usize;
        let mut null_bucket_done = false;
        for stored in stored_values {
            // NULL and empty string are the same bucket; retarget it once.
            let is_null_bucket = stored.as_deref().map_or(true, str::is_empty);
            if is_null_bucket {
                if null_bucket_done {
                    continue;
                }
                null_bucket_done = true;
            }

            let Some(target) = classify(stored.as_deref(), &self.datasources, &default.name)
            else {
                continue;
            };

            let bucket = if is_null_bucket { None } else { stored };
            let store = Arc::clone(&self.store);
            let updated = tokio::task::spawn_blocking(move || {
                store.retarget_datasource(bucket.as_deref(), &target)
            })
            .await??;
            total += updated;
        }

        Ok(total)
    }
}

/// Decide the canonical target for one stored datasource value. `None`
/// means the value is already canonical.
///
/// Rules: null/empty and unknown names map to the default; a
/// case-insensitive match with a configured name maps to that name's
/// canonical casing. Config validation rejects names that collide under
/// case-folding, so the first match is the only match.
fn classify(stored: Option<&str>, datasources: &[Datasource], default_name: &str) -> Option<String> {
    let value = match stored {
        None | Some("") => return Some(default_name.to_string()),
        Some(value) => value,
    };

    match datasources
        .iter()
        .find(|ds| ds.name.eq_ignore_ascii_case(value))
    {
        // Unknown datasource name: reattribute to the default.
        None => Some(default_name.to_string()),
        Some(ds) if ds.name == value => None,
        // Known name, wrong casing: rewrite to canonical casing.
        Some(ds) => Some(ds.name.clone()),
    }
}
