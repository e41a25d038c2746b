//! SQLite-backed transfer store.
//!
//! Holds one row per tracked transfer plus the auxiliary per-service
//! tables (log entries, service stats). The reaper flips the active flag,
//! the guardian rewrites datasource attribution and removes orphaned
//! services; everything else in the schema is opaque to this core.
//!
//! All methods are synchronous SQLite calls; long-running callers invoke
//! them through `tokio::task::spawn_blocking`.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, params_from_iter, Connection, TransactionBehavior};

use crate::error::Result;

/// Application id carried by placeholder rows created before the real id
/// is known. Such rows are never legitimately active.
pub const INVALID_APP_ID: i64 = 0;

/// Schema applied on open. `IF NOT EXISTS` keeps reopening idempotent.
pub const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS transfers (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    service       TEXT NOT NULL,
    app_id        INTEGER NOT NULL DEFAULT 0,
    datasource    TEXT,
    is_active     INTEGER NOT NULL DEFAULT 1,
    last_write_at INTEGER NOT NULL,
    bytes_hit     INTEGER NOT NULL DEFAULT 0,
    bytes_miss    INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_transfers_active
    ON transfers(is_active, last_write_at);
CREATE INDEX IF NOT EXISTS idx_transfers_service
    ON transfers(service COLLATE NOCASE);

CREATE TABLE IF NOT EXISTS log_entries (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    service   TEXT NOT NULL,
    logged_at INTEGER NOT NULL,
    payload   TEXT
);
CREATE INDEX IF NOT EXISTS idx_log_entries_service
    ON log_entries(service COLLATE NOCASE);

CREATE TABLE IF NOT EXISTS service_stats (
    service         TEXT PRIMARY KEY,
    total_bytes_hit  INTEGER NOT NULL DEFAULT 0,
    total_bytes_miss INTEGER NOT NULL DEFAULT 0,
    last_updated_at  INTEGER NOT NULL DEFAULT 0
);
";

/// One tracked transfer row.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferRecord {
    pub id: i64,
    pub service: String,
    pub app_id: i64,
    pub datasource: Option<String>,
    pub is_active: bool,
    pub last_write_at: i64,
    pub bytes_hit: i64,
    pub bytes_miss: i64,
}

/// Row counts from a transactional multi-table service removal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceRemoval {
    pub services_removed: usize,
    pub log_entries: usize,
    pub transfers: usize,
    pub service_stats: usize,
}

impl ServiceRemoval {
    #[must_use]
    pub fn total_rows(&self) -> usize {
        self.log_entries + self.transfers + self.service_stats
    }
}

/// Handle over the SQLite database.
pub struct TransferStore {
    conn: Mutex<Connection>,
}

impl TransferStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Open an in-memory store (tests).
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000; PRAGMA foreign_keys=ON;",
        )?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert a transfer row (ingestion path and tests).
    pub fn insert_transfer(
        &self,
        service: &str,
        app_id: i64,
        datasource: Option<&str>,
        is_active: bool,
        last_write_at: i64,
    ) -> Result<i64> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO transfers (service, app_id, datasource, is_active, last_write_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![service, app_id, datasource, is_active as i64, last_write_at],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Insert a log entry row for a service.
    pub fn insert_log_entry(&self, service: &str, logged_at: i64, payload: &str) -> Result<i64> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO log_entries (service, logged_at, payload) VALUES (?1, ?2, ?3)",
            params![service, logged_at, payload],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Upsert the per-service stat row.
    pub fn upsert_service_stats(&self, service: &str, bytes_hit: i64, bytes_miss: i64) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO service_stats (service, total_bytes_hit, total_bytes_miss, last_updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(service) DO UPDATE SET
                 total_bytes_hit = total_bytes_hit + excluded.total_bytes_hit,
                 total_bytes_miss = total_bytes_miss + excluded.total_bytes_miss,
                 last_updated_at = excluded.last_updated_at",
            params![service, bytes_hit, bytes_miss, now_ms()],
        )?;
        Ok(())
    }

    /// Ids of active transfers whose last write is older than `cutoff_ms`,
    /// oldest first, bounded by `limit`.
    pub fn stale_active_ids(&self, cutoff_ms: i64, limit: usize) -> Result<Vec<i64>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id FROM transfers
             WHERE is_active = 1 AND last_write_at < ?1
             ORDER BY last_write_at ASC
             LIMIT ?2",
        )?;
        let ids = stmt
            .query_map(params![cutoff_ms, limit as i64], |row| row.get(0))?
            .collect::<std::result::Result<Vec<i64>, _>>()?;
        Ok(ids)
    }

    /// Flip `is_active` off for an id batch. Already-inactive rows are
    /// untouched, so the operation is idempotent.
    pub fn deactivate(&self, ids: &[i64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; ids.len()].join(",");
        let sql =
            format!("UPDATE transfers SET is_active = 0 WHERE is_active = 1 AND id IN ({placeholders})");
        let conn = self.lock();
        Ok(conn.execute(&sql, params_from_iter(ids.iter()))?)
    }

    /// Force-deactivate every row carrying the invalid placeholder app id,
    /// regardless of age.
    pub fn deactivate_invalid_app(&self) -> Result<usize> {
        let conn = self.lock();
        Ok(conn.execute(
            "UPDATE transfers SET is_active = 0 WHERE is_active = 1 AND app_id = ?1",
            [INVALID_APP_ID],
        )?)
    }

    /// Distinct service names present on transfer rows.
    pub fn distinct_services(&self) -> Result<Vec<String>> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT DISTINCT service FROM transfers")?;
        let services = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(services)
    }

    /// Distinct datasource values stored on transfer rows (None for NULL).
    pub fn distinct_datasources(&self) -> Result<Vec<Option<String>>> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT DISTINCT datasource FROM transfers")?;
        let values = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<Option<String>>, _>>()?;
        Ok(values)
    }

    /// Rewrite one stored datasource bucket to `target` in a single batched
    /// update. `None` covers both NULL and the empty string.
    pub fn retarget_datasource(&self, stored: Option<&str>, target: &str) -> Result<usize> {
        let conn = self.lock();
        let updated = match stored {
            None => conn.execute(
                "UPDATE transfers SET datasource = ?1
                 WHERE datasource IS NULL OR datasource = ''",
                [target],
            )?,
            Some(value) => conn.execute(
                "UPDATE transfers SET datasource = ?1 WHERE datasource = ?2",
                params![target, value],
            )?,
        };
        Ok(updated)
    }

    /// Delete every record belonging to the given services, all inside one
    /// immediate transaction. Any failure drops the transaction, which
    /// rolls back every delete already issued.
    ///
    /// Deletion order per service: log entries, transfers, service stats.
    pub fn remove_service_data(&self, services: &[String]) -> Result<ServiceRemoval> {
        let mut removal = ServiceRemoval::default();
        if services.is_empty() {
            return Ok(removal);
        }

        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        for service in services {
            removal.log_entries += tx.execute(
                "DELETE FROM log_entries WHERE service = ?1 COLLATE NOCASE",
                [service],
            )?;
            removal.transfers += tx.execute(
                "DELETE FROM transfers WHERE service = ?1 COLLATE NOCASE",
                [service],
            )?;
            removal.service_stats += tx.execute(
                "DELETE FROM service_stats WHERE service = ?1 COLLATE NOCASE",
                [service],
            )?;
            removal.services_removed += 1;
        }
        tx.commit()?;
        Ok(removal)
    }

    /// Fetch a single transfer row by id.
    pub fn transfer(&self, id: i64) -> Result<TransferRecord> {
        let conn = self.lock();
        let record = conn.query_row(
            "SELECT id, service, app_id, datasource, is_active, last_write_at,
                    bytes_hit, bytes_miss
             FROM transfers WHERE id = ?1",
            [id],
            |row| {
                Ok(TransferRecord {
                    id: row.get(0)?,
                    service: row.get(1)?,
                    app_id: row.get(2)?,
                    datasource: row.get(3)?,
                    is_active: row.get::<_, i64>(4)? != 0,
                    last_write_at: row.get(5)?,
                    bytes_hit: row.get(6)?,
                    bytes_miss: row.get(7)?,
                })
            },
        )?;
        Ok(record)
    }

    /// Number of currently active transfers.
    pub fn count_active(&self) -> Result<i64> {
        let conn = self.lock();
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM transfers WHERE is_active = 1",
            [],
            |row| row.get(0),
        )?)
    }
}

/// Current epoch time in milliseconds (UTC).
#[must_use]
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> TransferStore {
        TransferStore::open_in_memory().unwrap()
    }

    #[test]
    fn stale_query_respects_cutoff_and_limit() {
        let store = store();
        for i in 0..5 {
            store
                .insert_transfer("steam", 10, Some("primary"), true, 1_000 + i)
                .unwrap();
        }
        store
            .insert_transfer("steam", 10, Some("primary"), true, 10_000)
            .unwrap();

        let ids = store.stale_active_ids(5_000, 3).unwrap();
        assert_eq!(ids.len(), 3);
        // Oldest first
        let first = store.transfer(ids[0]).unwrap();
        assert_eq!(first.last_write_at, 1_000);

        let all = store.stale_active_ids(5_000, 100).unwrap();
        assert_eq!(all.len(), 5);
    }

    #[test]
    fn deactivate_is_idempotent() {
        let store = store();
        let id = store.insert_transfer("epic", 7, None, true, 1).unwrap();

        assert_eq!(store.deactivate(&[id]).unwrap(), 1);
        assert_eq!(store.deactivate(&[id]).unwrap(), 0);
        assert!(!store.transfer(id).unwrap().is_active);
    }

    #[test]
    fn deactivate_empty_batch_is_noop() {
        let store = store();
        assert_eq!(store.deactivate(&[]).unwrap(), 0);
    }

    #[test]
    fn invalid_app_rows_forced_inactive() {
        let store = store();
        let placeholder = store
            .insert_transfer("steam", INVALID_APP_ID, None, true, now_ms())
            .unwrap();
        let real = store
            .insert_transfer("steam", 440, None, true, now_ms())
            .unwrap();

        assert_eq!(store.deactivate_invalid_app().unwrap(), 1);
        assert!(!store.transfer(placeholder).unwrap().is_active);
        assert!(store.transfer(real).unwrap().is_active);
    }

    #[test]
    fn distinct_projections() {
        let store = store();
        store.insert_transfer("steam", 1, Some("a"), true, 1).unwrap();
        store.insert_transfer("steam", 2, Some("b"), true, 1).unwrap();
        store.insert_transfer("epic", 3, None, false, 1).unwrap();

        let mut services = store.distinct_services().unwrap();
        services.sort();
        assert_eq!(services, vec!["epic", "steam"]);

        let datasources = store.distinct_datasources().unwrap();
        assert_eq!(datasources.len(), 3);
        assert!(datasources.contains(&None));
    }

    #[test]
    fn retarget_null_bucket_covers_empty_string() {
        let store = store();
        let a = store.insert_transfer("steam", 1, None, true, 1).unwrap();
        let b = store.insert_transfer("steam", 2, Some(""), true, 1).unwrap();
        let c = store
            .insert_transfer("steam", 3, Some("keep"), true, 1)
            .unwrap();

        assert_eq!(store.retarget_datasource(None, "primary").unwrap(), 2);
        assert_eq!(store.transfer(a).unwrap().datasource.as_deref(), Some("primary"));
        assert_eq!(store.transfer(b).unwrap().datasource.as_deref(), Some("primary"));
        assert_eq!(store.transfer(c).unwrap().datasource.as_deref(), Some("keep"));
    }

    #[test]
    fn remove_service_data_deletes_all_tables_case_insensitively() {
        let store = store();
        store.insert_transfer("Steam", 1, None, true, 1).unwrap();
        store.insert_transfer("steam", 2, None, false, 1).unwrap();
        store.insert_log_entry("STEAM", 1, "line").unwrap();
        store.upsert_service_stats("steam", 10, 20).unwrap();
        store.insert_transfer("epic", 3, None, true, 1).unwrap();

        let removal = store
            .remove_service_data(&["steam".to_string()])
            .unwrap();
        assert_eq!(removal.services_removed, 1);
        assert_eq!(removal.transfers, 2);
        assert_eq!(removal.log_entries, 1);
        assert_eq!(removal.service_stats, 1);
        assert_eq!(removal.total_rows(), 4);

        let services = store.distinct_services().unwrap();
        assert_eq!(services, vec!["epic"]);
    }

    #[test]
    fn remove_service_data_empty_is_noop() {
        let store = store();
        store.insert_transfer("steam", 1, None, true, 1).unwrap();
        let removal = store.remove_service_data(&[]).unwrap();
        assert_eq!(removal.total_rows(), 0);
        assert_eq!(store.distinct_services().unwrap().len(), 1);
    }
}
