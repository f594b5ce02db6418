use futures::future::BoxFuture;
use serde_json::{Map, Value};
use tracing::debug;

use flowrun_core::error::{FlowError, Result};
use flowrun_core::flow::{FlowDefinition, Node};
use flowrun_core::types::{NodeId, TriggerType};

use crate::context::ExecutionContext;
use crate::expression::resolve_param;
use crate::scheduler::{DagScheduler, EngineServices};
use crate::vertex::VertexResult;

/// Executes one node type.
///
/// A runner computes its node's output into `vertex` and narrows
/// `vertex`'s children when it branches or terminates. Runners hold no
/// per-run state: everything they need arrives through the invocation and
/// the execution context.
pub trait NodeRunner: Send + Sync {
    fn execute<'a>(
        &'a self,
        invocation: &'a NodeInvocation<'a>,
        vertex: &'a mut VertexResult,
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<()>>;
}

/// Whether the node is where the walk started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationMode {
    /// First node of the walk (the entry, or the resumed wait node).
    Entry,
    /// Reached by following edges from another node.
    Forward,
}

/// A parent that kept this node among its children.
#[derive(Debug, Clone)]
pub struct ParentResult {
    pub node_id: NodeId,
    pub result: Option<Value>,
}

/// What the previous frontier hands to a node.
#[derive(Debug, Clone, Default)]
pub struct UpstreamResults {
    pub parents: Vec<ParentResult>,
    /// Overrides the run's trigger type for Start nodes entered as a
    /// synthetic sub-entry (loop bodies).
    pub appoint_trigger_type: Option<TriggerType>,
}

/// Everything a runner sees besides the mutable vertex and context.
pub struct NodeInvocation<'a> {
    pub node: &'a Node,
    pub flow: &'a FlowDefinition,
    pub mode: InvocationMode,
    /// Declared inputs, already resolved.
    pub inputs: Map<String, Value>,
    pub upstream: &'a UpstreamResults,
    /// False inside nested walks (loop bodies, sub-flows).
    pub allow_suspend: bool,
    /// Nesting depth of the walk this node belongs to.
    pub depth: usize,
    pub scheduler: &'a DagScheduler,
}

impl<'a> NodeInvocation<'a> {
    pub fn services(&self) -> &'a EngineServices {
        self.scheduler.services()
    }

    /// Evaluate a parameter against the current context.
    pub fn resolve(&self, param: &Value, ctx: &ExecutionContext) -> Result<Value> {
        resolve_param(param, ctx, self.services().resolver.as_ref())
    }

    /// Children of this node on the named branch.
    pub fn branch_children(&self, branch: &str) -> Vec<NodeId> {
        self.flow.branch_targets(&self.node.id, branch)
    }
}

/// Resolve a node's declared inputs. A required input that cannot be
/// resolved fails with `MissingRequiredInput`.
pub fn resolve_inputs(
    node: &Node,
    ctx: &ExecutionContext,
    services: &EngineServices,
) -> Result<Map<String, Value>> {
    let mut inputs = Map::new();
    for spec in &node.inputs {
        match services.resolver.resolve(&spec.expr, ctx) {
            Ok(value) => {
                inputs.insert(spec.name.clone(), value);
            }
            Err(FlowError::UnresolvedReference(_)) if !spec.required => {
                inputs.insert(spec.name.clone(), Value::Null);
            }
            Err(FlowError::UnresolvedReference(_)) => {
                return Err(FlowError::MissingRequiredInput {
                    node: node.id.clone(),
                    input: spec.name.clone(),
                });
            }
            Err(e) => return Err(e),
        }
    }
    Ok(inputs)
}

/// Template method around a runner: validate inputs, execute, then record
/// the output in the node context unless the node suspended the run.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn invoke(
    scheduler: &DagScheduler,
    flow: &FlowDefinition,
    node: &Node,
    mode: InvocationMode,
    upstream: &UpstreamResults,
    walk: &crate::scheduler::WalkOptions,
    vertex: &mut VertexResult,
    ctx: &mut ExecutionContext,
) -> Result<()> {
    let factory = scheduler.registry().resolve(&node.node_type, &node.version)?;
    let runner = factory();

    let inputs = resolve_inputs(node, ctx, scheduler.services())?;
    let invocation = NodeInvocation {
        node,
        flow,
        mode,
        inputs,
        upstream,
        allow_suspend: walk.allow_suspend,
        depth: walk.depth,
        scheduler,
    };

    runner.execute(&invocation, vertex, ctx).await?;

    if vertex.is_suspended() {
        debug!(node_id = %node.id, "Node suspended the run, output deferred to resume");
        return Ok(());
    }
    if let Some(value) = vertex.result() {
        ctx.record(node.id.clone(), value.clone());
    }
    Ok(())
}
