use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::info;

use flowrun_core::error::{FlowError, Result};
use flowrun_core::flow::node_types;

use crate::context::ExecutionContext;
use crate::runner::{NodeInvocation, NodeRunner};
use crate::scheduler::WalkOptions;
use crate::vertex::VertexResult;

#[derive(Debug, Deserialize)]
struct SubFlowParams {
    flow_code: String,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    params: Value,
}

/// Calls another flow as a function.
///
/// The child runs in its own context (trigger `param_call`, payload = the
/// resolved `params`) sharing this run's scope and operator. Its last `end`
/// output becomes this node's output.
#[derive(Debug, Default)]
pub struct SubFlowRunner;

impl NodeRunner for SubFlowRunner {
    fn execute<'a>(
        &'a self,
        inv: &'a NodeInvocation<'a>,
        vertex: &'a mut VertexResult,
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let params: SubFlowParams = inv.node.parse_params()?;
            let node_id = &inv.node.id;

            let flow = inv
                .services()
                .catalog
                .load(&params.flow_code, params.version.as_deref())
                .await?;
            inv.scheduler.check_flow(&flow)?;
            let entry = flow.entry_node().ok_or_else(|| {
                FlowError::Validation(format!("flow {} has no entry node", flow.code))
            })?;

            let payload = match inv.resolve(&params.params, ctx)? {
                Value::Null => Value::Object(Map::new()),
                other => other,
            };
            let mut child = ctx.for_sub_flow(&flow, payload);

            info!(node_id = %node_id, child_flow = %flow.code, depth = inv.depth + 1, "Calling sub-flow");
            let walk = inv
                .scheduler
                .walk(
                    &flow,
                    &entry.id,
                    &mut child,
                    WalkOptions::nested(inv.depth, None),
                )
                .await?;

            for e in &walk.executed {
                vertex.log(format!(
                    "{}/{} {}",
                    flow.code,
                    e.node_id,
                    if e.success { "ok" } else { "failed" }
                ));
            }
            if let Some((failed_at, reason)) = walk.failed {
                return Err(FlowError::runner(
                    node_id.clone(),
                    format!("sub-flow {} failed at {}: {}", flow.code, failed_at, reason),
                ));
            }
            if let Some(waiting) = walk.suspended_at {
                return Err(FlowError::Suspension(format!(
                    "sub-flow {} suspended at {}",
                    flow.code, waiting
                )));
            }

            let output = walk
                .executed
                .iter()
                .rev()
                .filter(|e| e.node_type == node_types::END)
                .find_map(|e| child.node_output(&e.node_id).cloned())
                .unwrap_or_else(|| Value::Object(Map::new()));
            vertex.set_result(output);
            Ok(())
        })
    }
}
