use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;

use flowrun_core::error::{FlowError, Result};
use flowrun_core::traits::{Clock, WaitStore};
use flowrun_core::types::ConversationScope;
use flowrun_core::wait::{WaitRecord, WaitRecordKey};

#[derive(Default)]
struct Inner {
    seq: u64,
    records: HashMap<WaitRecordKey, (u64, WaitRecord)>,
}

/// Process-local wait store. Records do not survive a restart.
///
/// Insertion order breaks ties between records created in the same second,
/// matching the `rowid` ordering of the SQLite store.
pub struct MemoryWaitStore {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
}

impl MemoryWaitStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|i| i.records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|e| FlowError::Database(e.to_string()))
    }

    fn newest_first(inner: &Inner, scope: &ConversationScope) -> Vec<WaitRecord> {
        let mut matching: Vec<&(u64, WaitRecord)> = inner
            .records
            .values()
            .filter(|(_, r)| r.matches(scope))
            .collect();
        matching.sort_by(|(sa, a), (sb, b)| b.created_at.cmp(&a.created_at).then(sb.cmp(sa)));
        matching.into_iter().map(|(_, r)| r.clone()).collect()
    }
}

impl WaitStore for MemoryWaitStore {
    fn save(&self, record: &WaitRecord) -> BoxFuture<'_, Result<()>> {
        let record = record.clone();
        Box::pin(async move {
            let mut inner = self.lock()?;
            inner.seq += 1;
            let seq = inner.seq;
            inner.records.insert(record.key(), (seq, record));
            Ok(())
        })
    }

    fn find_by_scope(
        &self,
        scope: &ConversationScope,
    ) -> BoxFuture<'_, Result<Option<WaitRecord>>> {
        let scope = scope.clone();
        Box::pin(async move {
            let now = self.clock.now();
            let inner = self.lock()?;
            Ok(Self::newest_first(&inner, &scope)
                .into_iter()
                .find(|r| !r.is_expired(now)))
        })
    }

    fn claim(&self, record: &WaitRecord) -> BoxFuture<'_, Result<bool>> {
        let key = record.key();
        let record_id = record.record_id.clone();
        Box::pin(async move {
            let mut inner = self.lock()?;
            let held = inner
                .records
                .get(&key)
                .is_some_and(|(_, r)| r.record_id == record_id);
            if held {
                inner.records.remove(&key);
            }
            Ok(held)
        })
    }

    fn list_by_scope(&self, scope: &ConversationScope) -> BoxFuture<'_, Result<Vec<WaitRecord>>> {
        let scope = scope.clone();
        Box::pin(async move {
            let inner = self.lock()?;
            Ok(Self::newest_first(&inner, &scope))
        })
    }

    fn reap_expired(&self, now: DateTime<Utc>) -> BoxFuture<'_, Result<Vec<WaitRecord>>> {
        Box::pin(async move {
            let mut inner = self.lock()?;
            let expired: Vec<WaitRecordKey> = inner
                .records
                .iter()
                .filter(|(_, (_, r))| r.is_expired(now))
                .map(|(k, _)| k.clone())
                .collect();
            let mut reaped: Vec<WaitRecord> = expired
                .iter()
                .filter_map(|k| inner.records.remove(k).map(|(_, r)| r))
                .collect();
            reaped.sort_by_key(|r| r.timeout_at);
            Ok(reaped)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowrun_test_utils::{wait_record, ManualClock};

    fn scope() -> ConversationScope {
        ConversationScope::new("org", "conv")
    }

    #[tokio::test]
    async fn test_find_skips_expired_and_prefers_newest() {
        let clock = Arc::new(ManualClock::at_epoch(1_000));
        let store = MemoryWaitStore::new(clock.clone());

        store.save(&wait_record("org", "conv", "a", None)).await.unwrap();
        store.save(&wait_record("org", "conv", "b", Some(1_030))).await.unwrap();

        let found = store.find_by_scope(&scope()).await.unwrap().unwrap();
        assert_eq!(found.waiting_node_id, "b");

        clock.advance_secs(30);
        let found = store.find_by_scope(&scope()).await.unwrap().unwrap();
        assert_eq!(found.waiting_node_id, "a");
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_claim_removes_once() {
        let store = MemoryWaitStore::new(Arc::new(ManualClock::at_epoch(0)));
        let record = wait_record("org", "conv", "w", None);
        store.save(&record).await.unwrap();
        assert!(store.claim(&record).await.unwrap());
        assert!(!store.claim(&record).await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_stale_copy_cannot_claim_newer_record() {
        let store = MemoryWaitStore::new(Arc::new(ManualClock::at_epoch(0)));
        let stale = wait_record("org", "conv", "w", None);
        store.save(&stale).await.unwrap();
        assert!(store.claim(&stale).await.unwrap());

        let fresh = wait_record("org", "conv", "w", None);
        store.save(&fresh).await.unwrap();
        assert!(!store.claim(&stale).await.unwrap());
        assert_eq!(store.len(), 1);
        assert!(store.claim(&fresh).await.unwrap());
    }

    #[tokio::test]
    async fn test_reap_expired_removes_only_due() {
        let clock = Arc::new(ManualClock::at_epoch(1_000));
        let store = MemoryWaitStore::new(clock.clone());
        store.save(&wait_record("org", "conv", "a", Some(1_005))).await.unwrap();
        store.save(&wait_record("org", "other", "b", Some(1_002))).await.unwrap();
        store.save(&wait_record("org", "conv", "c", None)).await.unwrap();

        clock.advance_secs(5);
        let reaped = store.reap_expired(clock.now()).await.unwrap();
        let ids: Vec<_> = reaped.iter().map(|r| r.waiting_node_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(store.len(), 1);
    }
}
