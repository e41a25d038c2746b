//! End-to-end lifecycle test over a file-backed store: boot corrections,
//! a reaper sweep, then a guardian sweep driven by a real scan report.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use cachepulse_core::config::{Datasource, GuardianConfig, ReaperConfig};
use cachepulse_core::guardian::ConsistencyGuardian;
use cachepulse_core::inventory::ScanReportInventory;
use cachepulse_core::reaper::StaleTransferReaper;
use cachepulse_core::storage::{now_ms, INVALID_APP_ID};
use cachepulse_core::{Shutdown, TransferStore};

fn datasource(name: &str, default: bool) -> Datasource {
    Datasource {
        name: name.to_string(),
        enabled: true,
        log_dir: PathBuf::from("/logs").join(name),
        default,
    }
}

#[tokio::test]
async fn boot_then_sweep_converges_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(TransferStore::open(&dir.path().join("cachepulse.db")).unwrap());

    // A mix of rows: quiet, fresh, placeholder, and one orphaned service
    // with a stray datasource value.
    let quiet = store
        .insert_transfer("steam", 730, Some("Primary"), true, now_ms() - 60_000)
        .unwrap();
    let fresh = store
        .insert_transfer("steam", 730, Some("primary"), true, now_ms())
        .unwrap();
    let placeholder = store
        .insert_transfer("epic", INVALID_APP_ID, None, true, now_ms())
        .unwrap();
    store
        .insert_transfer("defunct", 1, Some("gone"), false, now_ms() - 86_400_000)
        .unwrap();
    store.insert_log_entry("defunct", now_ms(), "old line").unwrap();

    // Reaper boot pass: placeholder forced inactive, quiet row finalized,
    // fresh row untouched.
    let reaper = StaleTransferReaper::new(Arc::clone(&store), ReaperConfig::default());
    let (invalid, report) = reaper
        .startup_corrections(&Shutdown::new())
        .await
        .unwrap();
    assert_eq!(invalid, 1);
    assert_eq!(report.finalized(), 1);
    assert!(!store.transfer(quiet).unwrap().is_active);
    assert!(!store.transfer(placeholder).unwrap().is_active);
    assert!(store.transfer(fresh).unwrap().is_active);

    // Scan report knows steam and epic but not the defunct service.
    let report_path = dir.path().join("scan_report.json");
    std::fs::write(
        &report_path,
        serde_json::json!({ "service_counts": { "steam": 12, "epic": 3 } }).to_string(),
    )
    .unwrap();

    let inventory = Arc::new(ScanReportInventory::new(
        report_path,
        Duration::from_secs(60),
    ));
    let guardian = ConsistencyGuardian::new(
        Arc::clone(&store),
        inventory,
        vec![datasource("Primary", true)],
        GuardianConfig::default(),
    );
    guardian.sweep(true).await;

    // The defunct service is gone from every table.
    let mut services = store.distinct_services().unwrap();
    services.sort();
    assert_eq!(services, vec!["epic", "steam"]);

    // Every surviving row is attributed to the canonical default.
    for id in [quiet, fresh, placeholder] {
        assert_eq!(
            store.transfer(id).unwrap().datasource.as_deref(),
            Some("Primary")
        );
    }
}
