use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use flowrun_core::error::{FlowError, Result};
use flowrun_core::types::TriggerType;

use crate::context::ExecutionContext;
use crate::runner::{NodeInvocation, NodeRunner};
use crate::scheduler::WalkOptions;
use crate::vertex::VertexResult;

#[derive(Debug, Deserialize)]
struct LoopParams {
    #[serde(default)]
    items: Option<Value>,
    #[serde(default)]
    count: Option<Value>,
    #[serde(default = "default_max_iterations")]
    max_iterations: usize,
}

fn default_max_iterations() -> usize {
    100
}

/// Walks the loop body once per item.
///
/// The body is the subgraph entered through the Start node whose parent is
/// this loop. Each iteration sees `{item, index}` under the loop's node id
/// and runs in a nested walk that cannot suspend.
#[derive(Debug, Default)]
pub struct LoopRunner;

impl NodeRunner for LoopRunner {
    fn execute<'a>(
        &'a self,
        inv: &'a NodeInvocation<'a>,
        vertex: &'a mut VertexResult,
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let params: LoopParams = inv.node.parse_params()?;
            let node_id = &inv.node.id;
            let items = iteration_items(inv, &params, ctx)?;
            if items.len() > params.max_iterations {
                return Err(FlowError::Validation(format!(
                    "loop {} has {} iterations, above max_iterations {}",
                    node_id,
                    items.len(),
                    params.max_iterations
                )));
            }

            let body = inv.flow.body_entry(node_id).ok_or_else(|| {
                FlowError::Validation(format!("loop {} has no body start node", node_id))
            })?;

            let iterations = items.len();
            for (index, item) in items.into_iter().enumerate() {
                ctx.record(node_id.clone(), json!({ "item": item, "index": index }));
                let walk = inv
                    .scheduler
                    .walk(
                        inv.flow,
                        &body.id,
                        ctx,
                        WalkOptions::nested(inv.depth, Some(TriggerType::LoopStart)),
                    )
                    .await?;

                for e in &walk.executed {
                    vertex.log(format!(
                        "[{}] {} {}",
                        index,
                        e.node_id,
                        if e.success { "ok" } else { "failed" }
                    ));
                }
                if let Some((failed_at, reason)) = walk.failed {
                    return Err(FlowError::runner(
                        node_id.clone(),
                        format!("iteration {} failed at {}: {}", index, failed_at, reason),
                    ));
                }
                if let Some(waiting) = walk.suspended_at {
                    return Err(FlowError::Suspension(format!(
                        "loop {} body suspended at {}",
                        node_id, waiting
                    )));
                }
                debug!(node_id = %node_id, index, nodes = walk.executed.len(), "Loop iteration done");
            }

            vertex.set_result(json!({ "iterations": iterations }));
            Ok(())
        })
    }
}

fn iteration_items(
    inv: &NodeInvocation<'_>,
    params: &LoopParams,
    ctx: &ExecutionContext,
) -> Result<Vec<Value>> {
    if let Some(items) = &params.items {
        return match inv.resolve(items, ctx)? {
            Value::Array(items) => Ok(items),
            Value::Null => Ok(vec![]),
            other => Err(FlowError::Validation(format!(
                "loop {}: items must be an array, got {}",
                inv.node.id, other
            ))),
        };
    }
    if let Some(count) = &params.count {
        let resolved = inv.resolve(count, ctx)?;
        let n = match &resolved {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
        .ok_or_else(|| {
            FlowError::Validation(format!(
                "loop {}: count must be a non-negative integer, got {}",
                inv.node.id, resolved
            ))
        })?;
        return Ok((0..n).map(|i| json!(i)).collect());
    }
    Err(FlowError::Validation(format!(
        "loop {} needs items or count",
        inv.node.id
    )))
}
