use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::{json, Value};

use flowrun_core::error::Result;

use crate::condition::{combine, compare, CompareOp, Logic};
use crate::context::ExecutionContext;
use crate::runner::{NodeInvocation, NodeRunner};
use crate::vertex::VertexResult;

#[derive(Debug, Deserialize)]
struct IfElseParams {
    branches: Vec<ConditionBranch>,
    #[serde(default)]
    else_branch: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConditionBranch {
    branch_id: String,
    #[serde(default)]
    logic: Logic,
    #[serde(default)]
    conditions: Vec<Condition>,
}

#[derive(Debug, Deserialize)]
struct Condition {
    left: Value,
    op: CompareOp,
    #[serde(default)]
    right: Value,
}

/// Follows the edges of the first branch whose conditions hold.
#[derive(Debug, Default)]
pub struct IfElseRunner;

impl NodeRunner for IfElseRunner {
    fn execute<'a>(
        &'a self,
        inv: &'a NodeInvocation<'a>,
        vertex: &'a mut VertexResult,
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let params: IfElseParams = inv.node.parse_params()?;

            let mut taken = None;
            for branch in &params.branches {
                let mut results = Vec::with_capacity(branch.conditions.len());
                for cond in &branch.conditions {
                    let left = inv.resolve(&cond.left, ctx)?;
                    let right = inv.resolve(&cond.right, ctx)?;
                    results.push(compare(&left, cond.op, &right));
                }
                if combine(branch.logic, results) {
                    taken = Some(branch.branch_id.clone());
                    break;
                }
            }
            let taken = taken.or(params.else_branch);

            match &taken {
                Some(branch_id) => {
                    vertex.log(format!("branch {}", branch_id));
                    vertex.set_children(inv.branch_children(branch_id));
                }
                None => {
                    vertex.log("no branch matched");
                    vertex.clear_children();
                }
            }
            vertex.set_result(json!({ "branch_id": taken }));
            Ok(())
        })
    }
}
