//! Service inventory: which services exist in the log corpus right now.
//!
//! The probe maintains an index over the log corpus and publishes it as a
//! scan report (JSON with a `service_counts` object keyed by service name).
//! This module treats that report as an opaque read: the guardian only ever
//! asks "which service names are present". Reads are cached with a TTL;
//! `force_refresh` bypasses the cache.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::Result;

/// Source of the current log-corpus service name set.
pub trait ServiceInventory: Send + Sync {
    /// Names of services currently present in the log corpus, case-folded.
    ///
    /// An empty set means the scan produced nothing usable; callers must
    /// treat that as a scan failure, never as "everything is gone".
    fn service_names(&self, force_refresh: bool) -> Result<HashSet<String>>;
}

#[derive(Debug, Deserialize)]
struct ScanReport {
    #[serde(default)]
    service_counts: std::collections::HashMap<String, u64>,
}

/// Inventory backed by the probe's scan-report file.
pub struct ScanReportInventory {
    path: PathBuf,
    ttl: Duration,
    cache: Mutex<Option<(Instant, HashSet<String>)>>,
}

impl ScanReportInventory {
    #[must_use]
    pub fn new(path: PathBuf, ttl: Duration) -> Self {
        Self {
            path,
            ttl,
            cache: Mutex::new(None),
        }
    }

    fn read_report(&self) -> HashSet<String> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Scan report unreadable; treating inventory as empty"
                );
                return HashSet::new();
            }
        };

        match serde_json::from_str::<ScanReport>(&raw) {
            Ok(report) => report
                .service_counts
                .into_keys()
                .map(|name| name.to_lowercase())
                .collect(),
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Scan report malformed; treating inventory as empty"
                );
                HashSet::new()
            }
        }
    }
}

impl ServiceInventory for ScanReportInventory {
    fn service_names(&self, force_refresh: bool) -> Result<HashSet<String>> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());

        if !force_refresh {
            if let Some((read_at, names)) = cache.as_ref() {
                if read_at.elapsed() < self.ttl {
                    debug!(services = names.len(), "Service inventory served from cache");
                    return Ok(names.clone());
                }
            }
        }

        let names = self.read_report();
        debug!(
            services = names.len(),
            force_refresh, "Service inventory refreshed from scan report"
        );
        *cache = Some((Instant::now(), names.clone()));
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_report(services: &[(&str, u64)]) -> tempfile::NamedTempFile {
        let counts: std::collections::HashMap<&str, u64> =
            services.iter().copied().collect();
        let json = serde_json::json!({ "service_counts": counts });
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{json}").unwrap();
        file
    }

    #[test]
    fn reads_and_folds_service_names() {
        let file = write_report(&[("Steam", 100), ("EPIC", 4)]);
        let inventory =
            ScanReportInventory::new(file.path().to_path_buf(), Duration::from_secs(60));

        let names = inventory.service_names(false).unwrap();
        assert!(names.contains("steam"));
        assert!(names.contains("epic"));
        assert_eq!(names.len(), 2);
    }

    #[test]
    fn missing_report_yields_empty_set() {
        let inventory = ScanReportInventory::new(
            PathBuf::from("/nonexistent/scan_report.json"),
            Duration::from_secs(60),
        );
        assert!(inventory.service_names(false).unwrap().is_empty());
    }

    #[test]
    fn malformed_report_yields_empty_set() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let inventory =
            ScanReportInventory::new(file.path().to_path_buf(), Duration::from_secs(60));
        assert!(inventory.service_names(false).unwrap().is_empty());
    }

    #[test]
    fn force_refresh_bypasses_cache() {
        let file = write_report(&[("steam", 1)]);
        let inventory =
            ScanReportInventory::new(file.path().to_path_buf(), Duration::from_secs(3600));

        assert_eq!(inventory.service_names(false).unwrap().len(), 1);

        // Rewrite the report; the cached read must still serve the old set
        // until a forced refresh.
        std::fs::write(
            file.path(),
            serde_json::json!({ "service_counts": {"steam": 1, "epic": 2} }).to_string(),
        )
        .unwrap();

        assert_eq!(inventory.service_names(false).unwrap().len(), 1);
        assert_eq!(inventory.service_names(true).unwrap().len(), 2);
    }
}
