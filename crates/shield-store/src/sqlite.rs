//! SQLite-based store implementation

use chrono::{DateTime, Utc};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

use crate::{AuditEvent, Store, StoreError, StoreResult};

/// How long a writer waits for another process holding the database lock
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-based store
///
/// The main process and the shield-action extension process may open the same
/// file. Each collection write is a single statement, so readers in either
/// process observe whole values only.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(journal_mode = %mode, "Store opened");

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("store lock poisoned".into()))
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            -- One serialized value per collection
            CREATE TABLE IF NOT EXISTS collections (
                key TEXT PRIMARY KEY,
                blob TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- Audit log (append-only)
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                event_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp);
            "#,
        )?;

        debug!("Store schema initialized");
        Ok(())
    }
}

impl Store for SqliteStore {
    fn read_blob(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let conn = self.conn()?;

        // Read through ValueRef so non-UTF-8 text reaches the decoder as bytes
        let blob: Option<Vec<u8>> = conn
            .query_row("SELECT blob FROM collections WHERE key = ?", [key], |row| {
                Ok(match row.get_ref(0)? {
                    ValueRef::Text(bytes) | ValueRef::Blob(bytes) => bytes.to_vec(),
                    ValueRef::Integer(i) => i.to_string().into_bytes(),
                    ValueRef::Real(f) => f.to_string().into_bytes(),
                    ValueRef::Null => Vec::new(),
                })
            })
            .optional()?;

        Ok(blob)
    }

    fn write_blob(&self, key: &str, blob: &str) -> StoreResult<()> {
        let conn = self.conn()?;

        conn.execute(
            r#"
            INSERT INTO collections (key, blob, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key)
            DO UPDATE SET blob = excluded.blob, updated_at = excluded.updated_at
            "#,
            params![key, blob, shield_util::now().to_rfc3339()],
        )?;

        debug!(key, bytes = blob.len(), "Blob written");
        Ok(())
    }

    fn delete_blob(&self, key: &str) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM collections WHERE key = ?", [key])?;
        Ok(())
    }

    fn append_audit(&self, mut event: AuditEvent) -> StoreResult<()> {
        let conn = self.conn()?;
        let event_json = serde_json::to_string(&event.event)?;

        conn.execute(
            "INSERT INTO audit_log (timestamp, event_json) VALUES (?, ?)",
            params![event.timestamp.to_rfc3339(), event_json],
        )?;

        event.id = conn.last_insert_rowid();
        debug!(event_id = event.id, "Audit event appended");

        Ok(())
    }

    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT id, timestamp, event_json FROM audit_log ORDER BY id DESC LIMIT ?",
        )?;

        let rows = stmt.query_map([limit as i64], |row| {
            let id: i64 = row.get(0)?;
            let timestamp_str: String = row.get(1)?;
            let event_json: String = row.get(2)?;
            Ok((id, timestamp_str, event_json))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (id, timestamp_str, event_json) = row?;
            let timestamp = DateTime::parse_from_rfc3339(&timestamp_str)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| shield_util::now());

            // Skip entries written by a newer schema rather than failing the listing
            let event = match serde_json::from_str(&event_json) {
                Ok(event) => event,
                Err(e) => {
                    warn!(event_id = id, error = %e, "Skipping undecodable audit event");
                    continue;
                }
            };

            events.push(AuditEvent {
                id,
                timestamp,
                event,
            });
        }

        Ok(events)
    }

    fn is_healthy(&self) -> bool {
        match self.conn.lock() {
            Ok(conn) => conn.query_row("SELECT 1", [], |_| Ok(())).is_ok(),
            Err(_) => {
                warn!("Store lock poisoned");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AuditEventType, PASSCODE_KEY, Record, StoreExt};
    use shield_api::{ApplicationProfile, UnlockSession};
    use shield_util::AppToken;

    #[test]
    fn test_in_memory_store() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.is_healthy());
    }

    #[test]
    fn test_blob_replace() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.read_blob("k").unwrap().is_none());

        store.write_blob("k", "one").unwrap();
        store.write_blob("k", "two").unwrap();
        assert_eq!(store.read_blob("k").unwrap().as_deref(), Some(b"two".as_slice()));

        store.delete_blob("k").unwrap();
        assert!(store.read_blob("k").unwrap().is_none());
    }

    #[test]
    fn test_audit_log() {
        let store = SqliteStore::in_memory().unwrap();

        store
            .append_audit(AuditEvent::new(AuditEventType::ServiceStarted))
            .unwrap();
        store
            .append_audit(AuditEvent::new(AuditEventType::SessionsPurged { count: 2 }))
            .unwrap();

        let events = store.get_recent_audits(10).unwrap();
        assert_eq!(events.len(), 2);
        // Newest first
        assert!(matches!(events[0].event, AuditEventType::SessionsPurged { count: 2 }));
        assert!(matches!(events[1].event, AuditEventType::ServiceStarted));
    }

    #[test]
    fn test_file_store_shared_between_handles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shield.db");

        let main_process = SqliteStore::open(&path).unwrap();
        let extension = SqliteStore::open(&path).unwrap();

        let profile = ApplicationProfile::new(AppToken::from_bytes(vec![7]), "Chat");
        main_process.put_record(profile.clone()).unwrap();

        let seen = extension
            .get_record::<ApplicationProfile>(&profile.application_token)
            .unwrap();
        assert_eq!(seen, Some(profile));
    }

    #[test]
    fn test_data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shield.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.write_blob("k", "persisted").unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(
            store.read_blob("k").unwrap().as_deref(),
            Some(b"persisted".as_slice())
        );
    }

    #[test]
    fn test_non_utf8_collection_degrades_to_empty() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .conn()
            .unwrap()
            .execute(
                "INSERT INTO collections (key, blob, updated_at) \
                 VALUES (?, CAST(X'FFFE00C3' AS TEXT), '')",
                [UnlockSession::COLLECTION],
            )
            .unwrap();

        let raw = store.read_blob(UnlockSession::COLLECTION).unwrap();
        assert_eq!(raw.as_deref(), Some([0xff, 0xfe, 0x00, 0xc3].as_slice()));
        assert!(store.load_collection::<UnlockSession>().unwrap().is_empty());
    }

    #[test]
    fn test_binary_values_degrade_to_empty() {
        let store = SqliteStore::in_memory().unwrap();
        {
            let conn = store.conn().unwrap();
            for key in [ApplicationProfile::COLLECTION, PASSCODE_KEY] {
                conn.execute(
                    "INSERT INTO collections (key, blob, updated_at) VALUES (?, X'C328', '')",
                    [key],
                )
                .unwrap();
            }
        }

        assert!(store.load_collection::<ApplicationProfile>().unwrap().is_empty());
        assert!(store.load_passcode().unwrap().is_none());

        // The next write replaces the damaged value
        let profile = ApplicationProfile::new(AppToken::from_bytes(vec![7]), "Chat");
        store.put_record(profile.clone()).unwrap();
        assert_eq!(
            store
                .get_record::<ApplicationProfile>(&profile.application_token)
                .unwrap(),
            Some(profile)
        );
    }
}
