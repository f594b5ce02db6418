use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use flowrun_core::error::{FlowError, Result};
use flowrun_core::types::TriggerType;

use super::trigger_output;
use crate::context::ExecutionContext;
use crate::runner::{NodeInvocation, NodeRunner};
use crate::vertex::VertexResult;

#[derive(Debug, Deserialize)]
struct StartParams {
    #[serde(default)]
    branches: Vec<TriggerBranch>,
}

/// One subscription of a Start node: a trigger type and the edge label
/// followed when it fires.
#[derive(Debug, Deserialize)]
struct TriggerBranch {
    branch_id: String,
    trigger_type: TriggerType,
    /// Payload keys a `param_call` must carry.
    #[serde(default)]
    required_params: Vec<String>,
}

/// Entry point of a flow (or of a loop body).
///
/// Selects the first declared branch subscribed to the effective trigger
/// type. No subscriber ends the run quietly with zero children.
#[derive(Debug, Default)]
pub struct StartRunner;

impl NodeRunner for StartRunner {
    fn execute<'a>(
        &'a self,
        inv: &'a NodeInvocation<'a>,
        vertex: &'a mut VertexResult,
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let params: StartParams = inv.node.parse_params()?;
            let trigger = inv
                .upstream
                .appoint_trigger_type
                .unwrap_or_else(|| ctx.trigger_type());

            let Some(branch) = params.branches.iter().find(|b| b.trigger_type == trigger) else {
                debug!(node_id = %inv.node.id, trigger_type = %trigger, "No branch subscribes to trigger");
                vertex.log(format!("no branch for {}", trigger));
                vertex.set_result(json!({ "trigger_type": trigger }));
                vertex.clear_children();
                return Ok(());
            };

            for key in &branch.required_params {
                if ctx.trigger_payload().get(key).is_none() {
                    return Err(FlowError::MissingRequiredInput {
                        node: inv.node.id.clone(),
                        input: key.clone(),
                    });
                }
            }

            let output = if trigger == TriggerType::LoopStart {
                loop_iteration(inv, ctx)
            } else {
                trigger_output(ctx, trigger)
            };
            vertex.set_result(output);
            vertex.set_children(inv.branch_children(&branch.branch_id));
            Ok(())
        })
    }
}

/// A loop body's Start exposes the owning loop's current `{item, index}`.
fn loop_iteration(inv: &NodeInvocation<'_>, ctx: &ExecutionContext) -> Value {
    let mut out = inv
        .node
        .parent_id
        .as_deref()
        .and_then(|p| ctx.node_output(p))
        .and_then(|v| v.as_object())
        .cloned()
        .unwrap_or_default();
    out.insert("trigger_type".into(), json!(TriggerType::LoopStart));
    Value::Object(out)
}
