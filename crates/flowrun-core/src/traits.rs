use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;

use crate::error::Result;
use crate::flow::FlowDefinition;
use crate::types::ConversationScope;
use crate::wait::WaitRecord;

/// Durable suspension records.
///
/// `claim` must be a compare-and-delete on the record's identity: when several
/// callers race on the same record exactly one of them observes `true`, and a
/// stale copy never removes a newer record saved under the same key. The
/// engine relies on this for at-most-once resume.
pub trait WaitStore: Send + Sync + 'static {
    /// Insert or replace the record under its key.
    fn save(&self, record: &WaitRecord) -> BoxFuture<'_, Result<()>>;

    /// Newest non-expired record for the scope's organization and conversation.
    fn find_by_scope(&self, scope: &ConversationScope) -> BoxFuture<'_, Result<Option<WaitRecord>>>;

    /// Remove exactly this record (same key and `record_id`). Returns whether
    /// this call removed it.
    fn claim(&self, record: &WaitRecord) -> BoxFuture<'_, Result<bool>>;

    /// All records for a scope, expired ones included, newest first.
    fn list_by_scope(&self, scope: &ConversationScope) -> BoxFuture<'_, Result<Vec<WaitRecord>>>;

    /// Remove and return every record whose timeout is at or before `now`.
    fn reap_expired(&self, now: DateTime<Utc>) -> BoxFuture<'_, Result<Vec<WaitRecord>>>;
}

/// Source of flow definitions. Authoring happens elsewhere.
pub trait FlowCatalog: Send + Sync + 'static {
    /// Load a flow by code. `None` version means the latest available.
    fn load(&self, code: &str, version: Option<&str>) -> BoxFuture<'_, Result<Arc<FlowDefinition>>>;
}

/// Sandbox gateway for `code` nodes.
pub trait CodeExecutor: Send + Sync + 'static {
    fn execute(
        &self,
        language: &str,
        code: &str,
        inputs: serde_json::Value,
    ) -> BoxFuture<'_, Result<serde_json::Value>>;
}

/// Outbound message delivery for `reply_message` nodes.
pub trait OutboundSink: Send + Sync + 'static {
    fn send(&self, scope: &ConversationScope, content: &str) -> BoxFuture<'_, Result<()>>;
}

/// Time source. Injected so timeouts can be tested deterministically.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
