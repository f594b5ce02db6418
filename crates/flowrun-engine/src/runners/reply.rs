use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use flowrun_core::error::Result;
use flowrun_core::traits::OutboundSink;
use flowrun_core::types::ConversationScope;

use crate::context::ExecutionContext;
use crate::expression::display;
use crate::runner::{NodeInvocation, NodeRunner};
use crate::vertex::VertexResult;

#[derive(Debug, Deserialize)]
struct ReplyParams {
    content: Value,
}

/// Sends rendered content to the run's conversation.
#[derive(Debug, Default)]
pub struct ReplyRunner;

impl NodeRunner for ReplyRunner {
    fn execute<'a>(
        &'a self,
        inv: &'a NodeInvocation<'a>,
        vertex: &'a mut VertexResult,
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let params: ReplyParams = inv.node.parse_params()?;
            let content = display(&inv.resolve(&params.content, ctx)?);
            inv.services().outbound.send(ctx.scope(), &content).await?;
            vertex.set_result(json!({ "content": content }));
            Ok(())
        })
    }
}

/// Outbound sink that only logs. Used when no delivery channel is wired.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogOutbound;

impl OutboundSink for LogOutbound {
    fn send(&self, scope: &ConversationScope, content: &str) -> BoxFuture<'_, Result<()>> {
        info!(
            organization_code = %scope.organization_code,
            conversation_id = %scope.conversation_id,
            content,
            "Outbound message"
        );
        Box::pin(async { Ok(()) })
    }
}
