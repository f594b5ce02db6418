use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use flowrun_core::error::{FlowError, Result};

use crate::context::ExecutionContext;
use crate::runner::{NodeInvocation, NodeRunner};
use crate::vertex::VertexResult;

#[derive(Debug, Deserialize)]
struct CodeParams {
    #[serde(default = "default_language")]
    language: String,
    code: String,
}

fn default_language() -> String {
    "python".to_string()
}

/// Hands a snippet and the node's resolved inputs to the sandbox.
#[derive(Debug, Default)]
pub struct CodeRunner;

impl NodeRunner for CodeRunner {
    fn execute<'a>(
        &'a self,
        inv: &'a NodeInvocation<'a>,
        vertex: &'a mut VertexResult,
        _ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let params: CodeParams = inv.node.parse_params()?;
            let executor = inv.services().code_executor.as_ref().ok_or_else(|| {
                FlowError::Validation(format!(
                    "node {}: no code executor configured",
                    inv.node.id
                ))
            })?;

            debug!(node_id = %inv.node.id, language = %params.language, "Executing code node");
            let output = executor
                .execute(&params.language, &params.code, Value::Object(inv.inputs.clone()))
                .await?;
            vertex.set_result(output);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::registry::NodeRegistry;
    use crate::runners::testing::{chat, Harness};
    use crate::scheduler::{DagScheduler, EngineServices, RunStatus};
    use crate::ExecutionContext;
    use flowrun_core::config::EngineConfig;
    use flowrun_core::flow::{node_types, Edge, FlowDefinition, Node};
    use flowrun_store::{MemoryFlowCatalog, MemoryWaitStore};
    use flowrun_core::traits::SystemClock;
    use serde_json::json;

    fn flow() -> FlowDefinition {
        FlowDefinition::new(
            "calc",
            vec![
                Node::new("start", node_types::START).with_params(json!({
                    "branches": [{ "branch_id": "m", "trigger_type": "chat_message" }]
                })),
                Node::new("code", node_types::CODE)
                    .with_params(json!({ "language": "js", "code": "return {len: text.length}" }))
                    .with_input("text", "start.message")
                    .with_optional_input("extra", "start.missing"),
            ],
            vec![Edge::branch("start", "code", "m")],
        )
    }

    #[tokio::test]
    async fn test_executor_receives_inputs() {
        let h = Harness::new(vec![]);
        let outcome = h.run(&flow(), &chat("four")).await;
        assert_eq!(outcome.status, RunStatus::Completed);
        let out = outcome.context.node_output("code").unwrap();
        assert_eq!(out["language"], json!("js"));
        assert_eq!(out["inputs"], json!({ "text": "four", "extra": null }));
    }

    #[tokio::test]
    async fn test_missing_required_input_fails_node() {
        let h = Harness::new(vec![]);
        let mut f = flow();
        f.nodes[1].inputs[0].expr = "start.absent".into();
        let outcome = h.run(&f, &chat("four")).await;
        match outcome.status {
            RunStatus::Failed { node_id, reason } => {
                assert_eq!(node_id, "code");
                assert!(reason.contains("Missing required input 'text'"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(outcome.context.node_output("code").is_none());
    }

    #[tokio::test]
    async fn test_no_executor_is_validation_failure() {
        let services = EngineServices::new(
            Arc::new(MemoryWaitStore::new(Arc::new(SystemClock))),
            Arc::new(MemoryFlowCatalog::default()),
        );
        let scheduler = DagScheduler::new(
            NodeRegistry::with_builtins(),
            services,
            EngineConfig::default(),
        );
        let f = flow();
        let outcome = scheduler
            .run(&f, ExecutionContext::new(&f, &chat("x")))
            .await
            .unwrap();
        assert!(matches!(
            outcome.status,
            RunStatus::Failed { ref reason, .. } if reason.contains("no code executor")
        ));
    }
}
