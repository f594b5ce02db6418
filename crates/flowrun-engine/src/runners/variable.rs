use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::{Map, Value};

use flowrun_core::error::Result;

use crate::context::ExecutionContext;
use crate::runner::{NodeInvocation, NodeRunner};
use crate::vertex::VertexResult;

#[derive(Debug, Deserialize)]
struct VariableParams {
    variables: Map<String, Value>,
}

/// Assigns run-scoped global variables.
#[derive(Debug, Default)]
pub struct VariableSaveRunner;

impl NodeRunner for VariableSaveRunner {
    fn execute<'a>(
        &'a self,
        inv: &'a NodeInvocation<'a>,
        vertex: &'a mut VertexResult,
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let params: VariableParams = inv.node.parse_params()?;

            // Resolve everything first so a failure leaves the variables untouched.
            let mut assigned = Map::with_capacity(params.variables.len());
            for (name, param) in &params.variables {
                assigned.insert(name.clone(), inv.resolve(param, ctx)?);
            }
            for (name, value) in &assigned {
                ctx.set_variable(name.clone(), value.clone());
            }

            vertex.set_result(Value::Object(assigned));
            Ok(())
        })
    }
}
