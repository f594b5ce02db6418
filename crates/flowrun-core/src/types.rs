use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::FlowError;

/// Node identifier, unique within one flow.
pub type NodeId = String;

/// Unique run identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What caused a run to start. Closed set; a Start node selects its branch by it.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    ChatMessage,
    OpenChatWindow,
    AddFriend,
    LoopStart,
    ParamCall,
    Routine,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChatMessage => "chat_message",
            Self::OpenChatWindow => "open_chat_window",
            Self::AddFriend => "add_friend",
            Self::LoopStart => "loop_start",
            Self::ParamCall => "param_call",
            Self::Routine => "routine",
        }
    }
}

impl std::fmt::Display for TriggerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerType {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat_message" => Ok(Self::ChatMessage),
            "open_chat_window" => Ok(Self::OpenChatWindow),
            "add_friend" => Ok(Self::AddFriend),
            "loop_start" => Ok(Self::LoopStart),
            "param_call" => Ok(Self::ParamCall),
            "routine" => Ok(Self::Routine),
            other => Err(FlowError::Validation(format!(
                "unknown trigger type: {}",
                other
            ))),
        }
    }
}

/// Conversation/topic identifiers a run is scoped to. Suspension records are
/// keyed by this scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationScope {
    pub organization_code: String,
    pub conversation_id: String,
    /// Conversation the triggering message originally arrived in, when the
    /// run replies into a different one.
    #[serde(default)]
    pub origin_conversation_id: Option<String>,
    #[serde(default)]
    pub topic_id: Option<String>,
}

impl ConversationScope {
    pub fn new(organization_code: impl Into<String>, conversation_id: impl Into<String>) -> Self {
        Self {
            organization_code: organization_code.into(),
            conversation_id: conversation_id.into(),
            origin_conversation_id: None,
            topic_id: None,
        }
    }

    pub fn with_topic(mut self, topic_id: impl Into<String>) -> Self {
        self.topic_id = Some(topic_id.into());
        self
    }

    pub fn with_origin(mut self, origin_conversation_id: impl Into<String>) -> Self {
        self.origin_conversation_id = Some(origin_conversation_id.into());
        self
    }

    /// The origin conversation, falling back to the conversation itself.
    pub fn origin(&self) -> &str {
        self.origin_conversation_id
            .as_deref()
            .unwrap_or(&self.conversation_id)
    }
}

/// Identity on whose behalf a run executes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operator {
    pub uid: String,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub organization_code: String,
}

impl Operator {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            ..Default::default()
        }
    }
}

/// An inbound event entering the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub trigger_type: TriggerType,
    pub scope: ConversationScope,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub operator: Operator,
    pub received_at: DateTime<Utc>,
}

impl TriggerEvent {
    pub fn new(trigger_type: TriggerType, scope: ConversationScope) -> Self {
        Self {
            trigger_type,
            scope,
            payload: serde_json::Value::Object(Default::default()),
            operator: Operator::default(),
            received_at: Utc::now(),
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_operator(mut self, operator: Operator) -> Self {
        self.operator = operator;
        self
    }

    /// Convenience constructor for an inbound chat message.
    pub fn chat_message(scope: ConversationScope, text: impl Into<String>) -> Self {
        Self::new(TriggerType::ChatMessage, scope)
            .with_payload(serde_json::json!({ "message": text.into() }))
    }
}

/// Engine event broadcast to all subscribers.
#[derive(Debug, Clone)]
pub enum FlowEvent {
    /// A run started from its entry node.
    RunStarted {
        run_id: RunId,
        flow_code: String,
        trigger_type: TriggerType,
    },
    /// A suspended run was resumed at its waiting node.
    RunResumed {
        run_id: RunId,
        flow_code: String,
        node_id: NodeId,
    },
    /// One node finished (successfully or not).
    NodeFinished {
        run_id: RunId,
        node_id: NodeId,
        node_type: String,
        success: bool,
        elapsed_ms: u64,
    },
    /// A run paused and persisted a wait record.
    RunSuspended {
        run_id: RunId,
        flow_code: String,
        node_id: NodeId,
    },
    /// The frontier emptied without failure.
    RunCompleted { run_id: RunId, flow_code: String },
    /// A run failed at a node.
    RunFailed {
        run_id: RunId,
        flow_code: String,
        node_id: NodeId,
        reason: String,
    },
    /// A wait record timed out and was reaped.
    WaitExpired {
        conversation_id: String,
        node_id: NodeId,
        flow_code: String,
    },
    /// A resuming event matched nothing resumable and was dropped.
    ResumeDropped {
        conversation_id: String,
        node_id: NodeId,
    },
}
