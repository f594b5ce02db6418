use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::{Map, Value};

use flowrun_core::error::Result;

use crate::context::ExecutionContext;
use crate::runner::{NodeInvocation, NodeRunner};
use crate::vertex::VertexResult;

#[derive(Debug, Default, Deserialize)]
struct EndParams {
    #[serde(default)]
    outputs: Map<String, Value>,
}

/// Terminal node. Emits its resolved outputs and prunes everything after it.
#[derive(Debug, Default)]
pub struct EndRunner;

impl NodeRunner for EndRunner {
    fn execute<'a>(
        &'a self,
        inv: &'a NodeInvocation<'a>,
        vertex: &'a mut VertexResult,
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let params: EndParams = inv.node.parse_params()?;
            let mut outputs = Map::with_capacity(params.outputs.len());
            for (name, param) in &params.outputs {
                outputs.insert(name.clone(), inv.resolve(param, ctx)?);
            }
            vertex.set_result(Value::Object(outputs));
            vertex.clear_children();
            Ok(())
        })
    }
}
