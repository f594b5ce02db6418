use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{ConversationScope, NodeId};

/// Durable record of a suspended run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitRecord {
    /// Unique per suspension. Two records saved under the same key are told
    /// apart by this, so a stale copy cannot claim a newer suspension.
    pub record_id: String,
    pub organization_code: String,
    pub conversation_id: String,
    pub origin_conversation_id: String,
    /// Node the run paused at; the resume walk starts here.
    pub waiting_node_id: NodeId,
    pub flow_code: String,
    pub flow_version: String,
    /// Operator uid that started the run.
    pub creator: String,
    /// Absolute expiry, epoch seconds.
    pub timeout_at: Option<i64>,
    /// Serialized execution context.
    pub snapshot: String,
    pub created_at: DateTime<Utc>,
}

/// Identity of a wait record: conversation scope plus waiting node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WaitRecordKey {
    pub organization_code: String,
    pub conversation_id: String,
    pub waiting_node_id: NodeId,
}

impl WaitRecord {
    /// Fresh identifier for a new suspension.
    pub fn new_record_id() -> String {
        Uuid::new_v4().to_string()
    }

    pub fn key(&self) -> WaitRecordKey {
        WaitRecordKey {
            organization_code: self.organization_code.clone(),
            conversation_id: self.conversation_id.clone(),
            waiting_node_id: self.waiting_node_id.clone(),
        }
    }

    /// Whether this record belongs to the given conversation scope.
    pub fn matches(&self, scope: &ConversationScope) -> bool {
        self.organization_code == scope.organization_code
            && self.conversation_id == scope.conversation_id
    }

    /// A record is expired once `now` reaches its timeout.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.timeout_at.is_some_and(|t| now.timestamp() >= t)
    }
}

impl std::fmt::Display for WaitRecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.organization_code, self.conversation_id, self.waiting_node_id
        )
    }
}
