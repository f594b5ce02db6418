use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use flowrun_core::error::Result;
use flowrun_core::flow::FlowDefinition;
use flowrun_core::types::{ConversationScope, NodeId, Operator, RunId, TriggerEvent, TriggerType};

/// Per-run mutable state threaded between nodes.
///
/// `node_context` holds every node's emitted output keyed by node id; later
/// nodes read earlier outputs through expressions. The whole context is what
/// a suspended run persists and what a resumed run is rehydrated from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    run_id: RunId,
    flow_code: String,
    flow_version: String,
    trigger_type: TriggerType,
    #[serde(default)]
    trigger_payload: Value,
    #[serde(default)]
    operator: Operator,
    scope: ConversationScope,
    #[serde(default)]
    node_context: HashMap<NodeId, Value>,
    #[serde(default)]
    variables: Map<String, Value>,
    /// Cached serialization, dropped on every write.
    #[serde(skip)]
    snapshot: Option<String>,
}

impl ExecutionContext {
    /// Fresh context for a run of `flow` started by `event`.
    pub fn new(flow: &FlowDefinition, event: &TriggerEvent) -> Self {
        Self {
            run_id: RunId::new(),
            flow_code: flow.code.clone(),
            flow_version: flow.version.clone(),
            trigger_type: event.trigger_type,
            trigger_payload: event.payload.clone(),
            operator: event.operator.clone(),
            scope: event.scope.clone(),
            node_context: HashMap::new(),
            variables: flow.default_variables(),
            snapshot: None,
        }
    }

    /// Context for a child flow called from this run. Shares scope, operator
    /// and run id; everything else starts empty.
    pub fn for_sub_flow(&self, flow: &FlowDefinition, payload: Value) -> Self {
        Self {
            run_id: self.run_id.clone(),
            flow_code: flow.code.clone(),
            flow_version: flow.version.clone(),
            trigger_type: TriggerType::ParamCall,
            trigger_payload: payload,
            operator: self.operator.clone(),
            scope: self.scope.clone(),
            node_context: HashMap::new(),
            variables: flow.default_variables(),
            snapshot: None,
        }
    }

    /// Rehydrate a context persisted by `snapshot`.
    pub fn from_snapshot(snapshot: &str) -> Result<Self> {
        let mut ctx: Self = serde_json::from_str(snapshot)?;
        ctx.snapshot = Some(snapshot.to_string());
        Ok(ctx)
    }

    /// Serialized form of the context, materialized on first use.
    pub fn snapshot(&mut self) -> Result<&str> {
        if self.snapshot.is_none() {
            self.snapshot = Some(serde_json::to_string(self)?);
        }
        Ok(self.snapshot.as_deref().unwrap_or_default())
    }

    /// Apply the trigger of the event that resumes this run.
    pub fn apply_resume_event(&mut self, event: &TriggerEvent) {
        self.trigger_type = event.trigger_type;
        self.trigger_payload = event.payload.clone();
        self.snapshot = None;
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn flow_code(&self) -> &str {
        &self.flow_code
    }

    pub fn flow_version(&self) -> &str {
        &self.flow_version
    }

    pub fn trigger_type(&self) -> TriggerType {
        self.trigger_type
    }

    pub fn trigger_payload(&self) -> &Value {
        &self.trigger_payload
    }

    pub fn operator(&self) -> &Operator {
        &self.operator
    }

    pub fn scope(&self) -> &ConversationScope {
        &self.scope
    }

    /// Record a node's output. Last writer wins per node id.
    pub fn record(&mut self, node_id: impl Into<String>, value: Value) {
        self.node_context.insert(node_id.into(), value);
        self.snapshot = None;
    }

    /// A node's recorded output.
    pub fn node_output(&self, node_id: &str) -> Option<&Value> {
        self.node_context.get(node_id)
    }

    pub fn node_context(&self) -> &HashMap<NodeId, Value> {
        &self.node_context
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: Value) {
        self.variables.insert(name.into(), value);
        self.snapshot = None;
    }

    pub fn variables(&self) -> &Map<String, Value> {
        &self.variables
    }
}
