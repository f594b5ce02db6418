//! Flow model: the immutable graph a run walks.
//!
//! Flows are authored elsewhere and loaded as JSON. The engine only reads
//! them: a `FlowDefinition` never changes while a run is in progress.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{FlowError, Result};
use crate::types::NodeId;

/// Built-in node type tags.
pub mod node_types {
    pub const START: &str = "start";
    pub const WAIT_MESSAGE: &str = "wait_message";
    pub const IF_ELSE: &str = "if_else";
    pub const CODE: &str = "code";
    pub const REPLY_MESSAGE: &str = "reply_message";
    pub const VARIABLE_SAVE: &str = "variable_save";
    pub const LOOP: &str = "loop";
    pub const SUB_FLOW: &str = "sub_flow";
    pub const END: &str = "end";
}

/// A complete flow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowDefinition {
    /// Stable flow code, used to find the flow again on resume.
    pub code: String,
    #[serde(default = "default_flow_version")]
    pub version: String,
    #[serde(default)]
    pub name: String,
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    /// Global variable schema with defaults.
    #[serde(default)]
    pub variables: Vec<VariableSpec>,
}

fn default_flow_version() -> String {
    "1".to_string()
}

/// A node in the flow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    #[serde(default)]
    pub name: String,
    /// Type tag selecting the runner, e.g. `start`, `wait_message`.
    #[serde(rename = "type")]
    pub node_type: String,
    /// Runner version, `v<N>`.
    #[serde(default = "default_node_version")]
    pub version: String,
    /// Runner-specific parameter bag.
    #[serde(default)]
    pub params: serde_json::Value,
    /// Declared inputs, resolved before the runner executes.
    #[serde(default)]
    pub inputs: Vec<InputSpec>,
    /// Declared output field names.
    #[serde(default)]
    pub outputs: Vec<String>,
    /// Owning node for nested bodies (loop bodies).
    #[serde(default)]
    pub parent_id: Option<NodeId>,
}

fn default_node_version() -> String {
    "v0".to_string()
}

/// A declared node input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputSpec {
    pub name: String,
    /// Expression, e.g. `node_a.text` or `trigger.message`.
    pub expr: String,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

/// A directed edge, optionally labelled with the branch it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: NodeId,
    pub target: NodeId,
    #[serde(default)]
    pub branch: Option<String>,
}

/// A global variable with its default value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableSpec {
    pub name: String,
    #[serde(default)]
    pub default: serde_json::Value,
}

impl Node {
    /// Create a node with empty params.
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            node_type: node_type.into(),
            version: default_node_version(),
            params: serde_json::Value::Object(Default::default()),
            inputs: vec![],
            outputs: vec![],
            parent_id: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }

    pub fn with_input(mut self, name: impl Into<String>, expr: impl Into<String>) -> Self {
        self.inputs.push(InputSpec {
            name: name.into(),
            expr: expr.into(),
            required: true,
        });
        self
    }

    pub fn with_optional_input(mut self, name: impl Into<String>, expr: impl Into<String>) -> Self {
        self.inputs.push(InputSpec {
            name: name.into(),
            expr: expr.into(),
            required: false,
        });
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Deserialize the parameter bag into a runner-specific struct.
    pub fn parse_params<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.params.clone()).map_err(|e| {
            FlowError::Validation(format!("invalid params for node {}: {}", self.id, e))
        })
    }
}

impl Edge {
    /// Create an unlabelled edge.
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            branch: None,
        }
    }

    /// Create an edge belonging to a named branch of its source node.
    pub fn branch(
        source: impl Into<String>,
        target: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            branch: Some(branch.into()),
        }
    }
}

impl FlowDefinition {
    pub fn new(code: impl Into<String>, nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        Self {
            code: code.into(),
            version: default_flow_version(),
            name: String::new(),
            nodes,
            edges,
            variables: vec![],
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_variables(mut self, variables: Vec<VariableSpec>) -> Self {
        self.variables = variables;
        self
    }

    /// Look up a node by id.
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Look up a node by id, failing with `NodeNotFound`.
    pub fn require_node(&self, id: &str) -> Result<&Node> {
        self.node(id)
            .ok_or_else(|| FlowError::NodeNotFound(id.to_string()))
    }

    /// The top-level entry: the first Start node that is not owned by another node.
    pub fn entry_node(&self) -> Option<&Node> {
        self.nodes
            .iter()
            .find(|n| n.node_type == node_types::START && n.parent_id.is_none())
    }

    /// The Start node of a nested body owned by `parent_id`.
    pub fn body_entry(&self, parent_id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| {
            n.node_type == node_types::START && n.parent_id.as_deref() == Some(parent_id)
        })
    }

    /// Outgoing edges of a node, in declaration order.
    pub fn outgoing(&self, id: &str) -> impl Iterator<Item = &Edge> {
        let id = id.to_string();
        self.edges.iter().filter(move |e| e.source == id)
    }

    /// All graph children of a node, in declaration order, without duplicates.
    pub fn children(&self, id: &str) -> Vec<NodeId> {
        let mut seen = HashSet::new();
        self.outgoing(id)
            .filter(|e| seen.insert(e.target.clone()))
            .map(|e| e.target.clone())
            .collect()
    }

    /// Children reached through edges labelled `branch`.
    pub fn branch_targets(&self, id: &str, branch: &str) -> Vec<NodeId> {
        let mut seen = HashSet::new();
        self.outgoing(id)
            .filter(|e| e.branch.as_deref() == Some(branch))
            .filter(|e| seen.insert(e.target.clone()))
            .map(|e| e.target.clone())
            .collect()
    }

    /// Structural checks: unique node ids, edges between known nodes, an entry node.
    pub fn validate(&self) -> Result<()> {
        let mut ids = HashSet::new();
        for node in &self.nodes {
            if !ids.insert(node.id.as_str()) {
                return Err(FlowError::Validation(format!(
                    "flow {}: duplicate node id {}",
                    self.code, node.id
                )));
            }
        }

        for edge in &self.edges {
            for end in [&edge.source, &edge.target] {
                if !ids.contains(end.as_str()) {
                    return Err(FlowError::Validation(format!(
                        "flow {}: edge {} -> {} references unknown node {}",
                        self.code, edge.source, edge.target, end
                    )));
                }
            }
        }

        for node in &self.nodes {
            if let Some(parent) = &node.parent_id {
                if !ids.contains(parent.as_str()) {
                    return Err(FlowError::Validation(format!(
                        "flow {}: node {} has unknown parent {}",
                        self.code, node.id, parent
                    )));
                }
            }
        }

        if self.entry_node().is_none() {
            return Err(FlowError::Validation(format!(
                "flow {}: no top-level start node",
                self.code
            )));
        }

        Ok(())
    }

    /// Initial values of the global variables.
    pub fn default_variables(&self) -> serde_json::Map<String, serde_json::Value> {
        self.variables
            .iter()
            .map(|v| (v.name.clone(), v.default.clone()))
            .collect()
    }
}
