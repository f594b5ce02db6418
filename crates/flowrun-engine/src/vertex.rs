use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use flowrun_core::types::NodeId;

/// Which graph children a node lets the scheduler continue into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Children {
    /// Every outgoing edge of the node.
    All,
    /// An explicit subset. Empty prunes the branch.
    Only(Vec<NodeId>),
}

/// Outcome of one node invocation.
///
/// Created fresh per invocation and consumed by the scheduler once it has
/// read the children.
#[derive(Debug, Clone, Serialize)]
pub struct VertexResult {
    node_id: NodeId,
    result: Option<Value>,
    children: Children,
    success: bool,
    suspended: bool,
    debug_log: Vec<String>,
}

impl VertexResult {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            result: None,
            children: Children::All,
            success: true,
            suspended: false,
            debug_log: vec![],
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn set_result(&mut self, value: Value) {
        self.result = Some(value);
    }

    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    /// Narrow to an explicit set of children.
    pub fn set_children(&mut self, children: Vec<NodeId>) {
        self.children = Children::Only(children);
    }

    /// Prune every child.
    pub fn clear_children(&mut self) {
        self.children = Children::Only(vec![]);
    }

    pub fn children(&self) -> &Children {
        &self.children
    }

    /// Mark the run as paused at this node. Prunes every child and keeps
    /// the result out of the node context.
    pub fn suspend(&mut self) {
        self.suspended = true;
        self.clear_children();
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// Finalize as failed. Children are pruned.
    pub fn fail(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        self.success = false;
        self.clear_children();
        self.debug_log.push(format!("failed: {}", reason));
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn log(&mut self, line: impl Into<String>) {
        self.debug_log.push(line.into());
    }

    pub fn debug_log(&self) -> &[String] {
        &self.debug_log
    }

    /// Intersect the kept children with the node's actual graph children.
    /// A runner may narrow the set but never add edges that do not exist.
    pub fn resolve_children(&self, graph_children: &[NodeId]) -> Vec<NodeId> {
        match &self.children {
            Children::All => graph_children.to_vec(),
            Children::Only(kept) => {
                for id in kept {
                    if !graph_children.contains(id) {
                        warn!(
                            node_id = %self.node_id,
                            child = %id,
                            "Runner kept a child with no edge, ignoring"
                        );
                    }
                }
                graph_children
                    .iter()
                    .filter(|c| kept.contains(*c))
                    .cloned()
                    .collect()
            }
        }
    }
}
