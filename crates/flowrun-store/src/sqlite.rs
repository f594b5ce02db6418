use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use flowrun_core::error::{FlowError, Result};
use flowrun_core::traits::{Clock, WaitStore};
use flowrun_core::types::ConversationScope;
use flowrun_core::wait::WaitRecord;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS wait_records (
        organization_code TEXT NOT NULL,
        conversation_id TEXT NOT NULL,
        waiting_node_id TEXT NOT NULL,
        origin_conversation_id TEXT NOT NULL,
        flow_code TEXT NOT NULL,
        flow_version TEXT NOT NULL,
        creator TEXT NOT NULL,
        timeout_at INTEGER,
        snapshot TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        record_id TEXT NOT NULL,
        PRIMARY KEY (organization_code, conversation_id, waiting_node_id)
    );

    CREATE INDEX IF NOT EXISTS idx_wait_scope
        ON wait_records(organization_code, conversation_id, created_at DESC);

    CREATE INDEX IF NOT EXISTS idx_wait_timeout
        ON wait_records(timeout_at);";

const COLUMNS: &str = "organization_code, conversation_id, waiting_node_id, origin_conversation_id,
     flow_code, flow_version, creator, timeout_at, snapshot, created_at, record_id";

fn db_err(e: rusqlite::Error) -> FlowError {
    FlowError::Database(e.to_string())
}

fn from_row(row: &Row<'_>) -> rusqlite::Result<WaitRecord> {
    let created_at: i64 = row.get(9)?;
    Ok(WaitRecord {
        record_id: row.get(10)?,
        organization_code: row.get(0)?,
        conversation_id: row.get(1)?,
        waiting_node_id: row.get(2)?,
        origin_conversation_id: row.get(3)?,
        flow_code: row.get(4)?,
        flow_version: row.get(5)?,
        creator: row.get(6)?,
        timeout_at: row.get(7)?,
        snapshot: row.get(8)?,
        created_at: DateTime::from_timestamp(created_at, 0).unwrap_or_default(),
    })
}

/// SQLite-backed wait store.
///
/// Records are keyed by `(organization_code, conversation_id,
/// waiting_node_id)`. Timestamps are stored as epoch seconds. Claiming a
/// record is a single `DELETE` matching both the key and the `record_id`, so
/// its change count tells the caller whether it won.
pub struct SqliteWaitStore {
    conn: Mutex<Connection>,
    clock: Arc<dyn Clock>,
}

impl SqliteWaitStore {
    /// Open or create the wait database.
    pub fn open(path: &Path, clock: Arc<dyn Clock>) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                FlowError::Database(format!("Failed to create db directory: {}", e))
            })?;
        }

        let conn = Connection::open(path).map_err(db_err)?;

        // Enable WAL mode for better concurrent performance
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;

        debug!(path = %path.display(), "Wait store opened");
        Ok(Self {
            conn: Mutex::new(conn),
            clock,
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory(clock: Arc<dyn Clock>) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
            clock,
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| FlowError::Database(e.to_string()))
    }
}

impl WaitStore for SqliteWaitStore {
    fn save(&self, record: &WaitRecord) -> BoxFuture<'_, Result<()>> {
        let record = record.clone();
        Box::pin(async move {
            let conn = self.lock()?;
            conn.execute(
                &format!(
                    "INSERT OR REPLACE INTO wait_records ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    COLUMNS
                ),
                params![
                    record.organization_code,
                    record.conversation_id,
                    record.waiting_node_id,
                    record.origin_conversation_id,
                    record.flow_code,
                    record.flow_version,
                    record.creator,
                    record.timeout_at,
                    record.snapshot,
                    record.created_at.timestamp(),
                    record.record_id,
                ],
            )
            .map_err(db_err)?;
            debug!(key = %record.key(), "Wait record saved");
            Ok(())
        })
    }

    fn find_by_scope(
        &self,
        scope: &ConversationScope,
    ) -> BoxFuture<'_, Result<Option<WaitRecord>>> {
        let org = scope.organization_code.clone();
        let conv = scope.conversation_id.clone();
        Box::pin(async move {
            let now = self.clock.now().timestamp();
            let conn = self.lock()?;
            conn.query_row(
                &format!(
                    "SELECT {} FROM wait_records
                     WHERE organization_code = ?1 AND conversation_id = ?2
                       AND (timeout_at IS NULL OR timeout_at > ?3)
                     ORDER BY created_at DESC, rowid DESC
                     LIMIT 1",
                    COLUMNS
                ),
                params![org, conv, now],
                from_row,
            )
            .optional()
            .map_err(db_err)
        })
    }

    fn claim(&self, record: &WaitRecord) -> BoxFuture<'_, Result<bool>> {
        let key = record.key();
        let record_id = record.record_id.clone();
        Box::pin(async move {
            let conn = self.lock()?;
            let changed = conn
                .execute(
                    "DELETE FROM wait_records
                     WHERE organization_code = ?1 AND conversation_id = ?2 AND waiting_node_id = ?3
                       AND record_id = ?4",
                    params![
                        key.organization_code,
                        key.conversation_id,
                        key.waiting_node_id,
                        record_id
                    ],
                )
                .map_err(db_err)?;
            Ok(changed == 1)
        })
    }

    fn list_by_scope(&self, scope: &ConversationScope) -> BoxFuture<'_, Result<Vec<WaitRecord>>> {
        let org = scope.organization_code.clone();
        let conv = scope.conversation_id.clone();
        Box::pin(async move {
            let conn = self.lock()?;
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM wait_records
                     WHERE organization_code = ?1 AND conversation_id = ?2
                     ORDER BY created_at DESC, rowid DESC",
                    COLUMNS
                ))
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![org, conv], from_row)
                .map_err(db_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_err)?;
            Ok(rows)
        })
    }

    fn reap_expired(&self, now: DateTime<Utc>) -> BoxFuture<'_, Result<Vec<WaitRecord>>> {
        Box::pin(async move {
            let mut conn = self.lock()?;
            let tx = conn.transaction().map_err(db_err)?;
            let expired = {
                let mut stmt = tx
                    .prepare(&format!(
                        "SELECT {} FROM wait_records
                         WHERE timeout_at IS NOT NULL AND timeout_at <= ?1
                         ORDER BY timeout_at",
                        COLUMNS
                    ))
                    .map_err(db_err)?;
                let rows = stmt
                    .query_map(params![now.timestamp()], from_row)
                    .map_err(db_err)?
                    .collect::<rusqlite::Result<Vec<_>>>()
                    .map_err(db_err)?;
                rows
            };
            tx.execute(
                "DELETE FROM wait_records WHERE timeout_at IS NOT NULL AND timeout_at <= ?1",
                params![now.timestamp()],
            )
            .map_err(db_err)?;
            tx.commit().map_err(db_err)?;
            Ok(expired)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowrun_test_utils::{wait_record, ManualClock};

    fn store() -> (SqliteWaitStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at_epoch(1_000));
        (SqliteWaitStore::in_memory(clock.clone()).unwrap(), clock)
    }

    fn scope() -> ConversationScope {
        ConversationScope::new("org", "conv")
    }

    #[tokio::test]
    async fn test_save_find_claim() {
        let (store, _) = store();
        let record = wait_record("org", "conv", "wait", Some(1_060));
        store.save(&record).await.unwrap();

        let found = store.find_by_scope(&scope()).await.unwrap().unwrap();
        assert_eq!(found, record);

        assert!(store.claim(&record).await.unwrap());
        assert!(!store.claim(&record).await.unwrap());
        assert!(store.find_by_scope(&scope()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stale_copy_cannot_claim_newer_record() {
        let (store, _) = store();
        let stale = wait_record("org", "conv", "wait", None);
        store.save(&stale).await.unwrap();
        assert!(store.claim(&stale).await.unwrap());

        let fresh = wait_record("org", "conv", "wait", None);
        store.save(&fresh).await.unwrap();

        assert!(!store.claim(&stale).await.unwrap());
        assert_eq!(store.find_by_scope(&scope()).await.unwrap(), Some(fresh.clone()));
        assert!(store.claim(&fresh).await.unwrap());
    }

    #[tokio::test]
    async fn test_save_upserts_by_key() {
        let (store, _) = store();
        let mut record = wait_record("org", "conv", "wait", None);
        store.save(&record).await.unwrap();
        record.snapshot = "{\"v\":2}".into();
        store.save(&record).await.unwrap();

        let all = store.list_by_scope(&scope()).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].snapshot, "{\"v\":2}");
    }

    #[tokio::test]
    async fn test_find_excludes_expired_and_other_scopes() {
        let (store, clock) = store();
        store
            .save(&wait_record("org", "conv", "wait", Some(1_060)))
            .await
            .unwrap();
        store
            .save(&wait_record("org", "other", "wait", None))
            .await
            .unwrap();

        clock.advance_secs(59);
        assert!(store.find_by_scope(&scope()).await.unwrap().is_some());
        clock.advance_secs(1);
        assert!(store.find_by_scope(&scope()).await.unwrap().is_none());
        // Still listed until reaped.
        assert_eq!(store.list_by_scope(&scope()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_find_returns_newest() {
        let (store, _) = store();
        let mut older = wait_record("org", "conv", "w1", None);
        older.created_at = DateTime::from_timestamp(500, 0).unwrap();
        let newer = wait_record("org", "conv", "w2", None);
        store.save(&newer).await.unwrap();
        store.save(&older).await.unwrap();

        let found = store.find_by_scope(&scope()).await.unwrap().unwrap();
        assert_eq!(found.waiting_node_id, "w2");
    }

    #[tokio::test]
    async fn test_reap_expired() {
        let (store, clock) = store();
        store.save(&wait_record("org", "conv", "a", Some(1_010))).await.unwrap();
        store.save(&wait_record("org", "conv", "b", Some(1_100))).await.unwrap();
        store.save(&wait_record("org", "conv", "c", None)).await.unwrap();

        clock.advance_secs(10);
        let reaped = store.reap_expired(clock.now()).await.unwrap();
        assert_eq!(reaped.len(), 1);
        assert_eq!(reaped[0].waiting_node_id, "a");

        let left: Vec<_> = store
            .list_by_scope(&scope())
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.waiting_node_id)
            .collect();
        assert_eq!(left.len(), 2);
        assert!(!left.contains(&"a".to_string()));
    }

    #[tokio::test]
    async fn test_concurrent_claims_have_one_winner() {
        let (store, _) = store();
        let store = Arc::new(store);
        let record = wait_record("org", "conv", "wait", None);
        store.save(&record).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            let record = record.clone();
            handles.push(tokio::spawn(async move { store.claim(&record).await.unwrap() }));
        }
        let mut winners = 0;
        for h in handles {
            if h.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_open_on_disk_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("waits.db");
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::at_epoch(1_000));
        let record = wait_record("org", "conv", "wait", None);

        {
            let store = SqliteWaitStore::open(&path, clock.clone()).unwrap();
            store.save(&record).await.unwrap();
        }
        let store = SqliteWaitStore::open(&path, clock).unwrap();
        assert_eq!(store.find_by_scope(&scope()).await.unwrap(), Some(record));
    }
}
