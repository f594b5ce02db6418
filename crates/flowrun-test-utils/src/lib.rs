//! Mocks and fixtures shared by the flowrun test suites.

use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde_json::{json, Value};

use flowrun_core::error::{FlowError, Result};
use flowrun_core::flow::{node_types, FlowDefinition, Node};
use flowrun_core::traits::{Clock, CodeExecutor, OutboundSink};
use flowrun_core::types::ConversationScope;
use flowrun_core::wait::WaitRecord;

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    secs: AtomicI64,
}

impl ManualClock {
    pub fn at_epoch(secs: i64) -> Self {
        Self {
            secs: AtomicI64::new(secs),
        }
    }

    pub fn advance_secs(&self, secs: i64) {
        self.secs.fetch_add(secs, Ordering::SeqCst);
    }

    pub fn set(&self, secs: i64) {
        self.secs.store(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.secs.load(Ordering::SeqCst), 0).unwrap_or_default()
    }
}

/// Outbound sink that keeps every message it is asked to send.
#[derive(Debug, Default)]
pub struct RecordingSink {
    messages: Mutex<Vec<(ConversationScope, String)>>,
    fail: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose every delivery fails.
    pub fn failing() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn messages(&self) -> Vec<(ConversationScope, String)> {
        self.messages.lock().unwrap().clone()
    }
}

impl OutboundSink for RecordingSink {
    fn send(&self, scope: &ConversationScope, content: &str) -> BoxFuture<'_, Result<()>> {
        let scope = scope.clone();
        let content = content.to_string();
        Box::pin(async move {
            if self.fail {
                return Err(FlowError::Outbound("sink unavailable".into()));
            }
            self.messages.lock().unwrap().push((scope, content));
            Ok(())
        })
    }
}

type Script = Box<dyn Fn(&str, &str, &Value) -> Result<Value> + Send + Sync>;

/// Code executor driven by a closure instead of a sandbox.
pub struct ScriptedCodeExecutor {
    script: Script,
}

impl ScriptedCodeExecutor {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&str, &str, &Value) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
        }
    }

    /// Returns `{"language", "code", "inputs"}` for every call.
    pub fn echo() -> Self {
        Self::new(|language, code, inputs| {
            Ok(json!({ "language": language, "code": code, "inputs": inputs }))
        })
    }

    /// Fails every call with the given message.
    pub fn failing(message: &str) -> Self {
        let message = message.to_string();
        Self::new(move |_, _, _| Err(FlowError::CodeExecution(message.clone())))
    }
}

impl CodeExecutor for ScriptedCodeExecutor {
    fn execute(&self, language: &str, code: &str, inputs: Value) -> BoxFuture<'_, Result<Value>> {
        let result = (self.script)(language, code, &inputs);
        Box::pin(async move { result })
    }
}

/// A top-level Start node with one branch per `(branch_id, trigger_type)`.
pub fn start_node(id: &str, branches: &[(&str, &str)]) -> Node {
    let branches: Vec<Value> = branches
        .iter()
        .map(|(branch_id, trigger)| json!({ "branch_id": branch_id, "trigger_type": trigger }))
        .collect();
    Node::new(id, node_types::START).with_params(json!({ "branches": branches }))
}

/// A wait record created at epoch second 1000 with an empty snapshot and a
/// fresh record id.
pub fn wait_record(org: &str, conv: &str, node: &str, timeout_at: Option<i64>) -> WaitRecord {
    WaitRecord {
        record_id: WaitRecord::new_record_id(),
        organization_code: org.into(),
        conversation_id: conv.into(),
        origin_conversation_id: conv.into(),
        waiting_node_id: node.into(),
        flow_code: "flow".into(),
        flow_version: "1".into(),
        creator: "u1".into(),
        timeout_at,
        snapshot: "{}".into(),
        created_at: DateTime::from_timestamp(1_000, 0).unwrap_or_default(),
    }
}

/// Write each flow as `<code>.json` into `dir`.
pub fn write_flows(dir: &Path, flows: &[FlowDefinition]) {
    std::fs::create_dir_all(dir).unwrap();
    for flow in flows {
        let path = dir.join(format!("{}.json", flow.code));
        std::fs::write(path, serde_json::to_string_pretty(flow).unwrap()).unwrap();
    }
}

/// A temp directory holding the given flows as JSON files.
pub fn temp_flows_dir(flows: &[FlowDefinition]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    write_flows(dir.path(), flows);
    dir
}

