use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::info;

use flowrun_core::error::{FlowError, Result};
use flowrun_core::wait::WaitRecord;

use super::trigger_output;
use crate::context::ExecutionContext;
use crate::runner::{InvocationMode, NodeInvocation, NodeRunner};
use crate::vertex::VertexResult;

#[derive(Debug, Default, Deserialize)]
struct WaitParams {
    #[serde(default)]
    timeout: TimeoutConfig,
}

/// Optional expiry of the wait record.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub interval: u64,
    #[serde(default)]
    pub unit: TimeUnit,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    #[default]
    Second,
    Minute,
    Hour,
    Day,
}

impl TimeoutConfig {
    /// Timeout length in seconds, `None` when disabled.
    pub fn interval_secs(&self) -> Option<i64> {
        if !self.enabled || self.interval == 0 {
            return None;
        }
        let unit = match self.unit {
            TimeUnit::Second => 1,
            TimeUnit::Minute => 60,
            TimeUnit::Hour => 3_600,
            TimeUnit::Day => 86_400,
        };
        i64::try_from(self.interval).ok()?.checked_mul(unit)
    }
}

/// Pauses the run until the next chat message in the conversation.
///
/// Reached mid-graph it persists a `WaitRecord` holding the context snapshot
/// and suspends. Entered as the first node of a walk (the resume pass) it
/// emits the new message and lets the run continue.
#[derive(Debug, Default)]
pub struct WaitMessageRunner;

impl NodeRunner for WaitMessageRunner {
    fn execute<'a>(
        &'a self,
        inv: &'a NodeInvocation<'a>,
        vertex: &'a mut VertexResult,
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            match inv.mode {
                InvocationMode::Entry => {
                    vertex.set_result(trigger_output(ctx, ctx.trigger_type()));
                    Ok(())
                }
                InvocationMode::Forward => suspend(inv, vertex, ctx).await,
            }
        })
    }
}

async fn suspend(
    inv: &NodeInvocation<'_>,
    vertex: &mut VertexResult,
    ctx: &mut ExecutionContext,
) -> Result<()> {
    if !inv.allow_suspend {
        return Err(FlowError::Suspension(format!(
            "node {} cannot wait inside a loop body or sub-flow",
            inv.node.id
        )));
    }

    let params: WaitParams = inv.node.parse_params()?;
    let services = inv.services();
    let now = services.clock.now();
    let scope = ctx.scope().clone();

    let record = WaitRecord {
        record_id: WaitRecord::new_record_id(),
        organization_code: scope.organization_code.clone(),
        conversation_id: scope.conversation_id.clone(),
        origin_conversation_id: scope.origin().to_string(),
        waiting_node_id: inv.node.id.clone(),
        flow_code: ctx.flow_code().to_string(),
        flow_version: ctx.flow_version().to_string(),
        creator: ctx.operator().uid.clone(),
        timeout_at: params
            .timeout
            .interval_secs()
            .map(|secs| now.timestamp() + secs),
        snapshot: ctx.snapshot()?.to_string(),
        created_at: now,
    };
    services.wait_store.save(&record).await?;

    info!(
        run_id = %ctx.run_id(),
        node_id = %inv.node.id,
        key = %record.key(),
        timeout_at = ?record.timeout_at,
        "Run waiting for message"
    );
    vertex.log(match record.timeout_at {
        Some(t) => format!("waiting until {}", t),
        None => "waiting without timeout".to_string(),
    });
    vertex.suspend();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runners::testing::{chat, scope, Harness};
    use crate::scheduler::{ResumeOutcome, RunStatus};
    use flowrun_core::flow::{node_types, Edge, FlowDefinition, Node};
    use flowrun_core::traits::WaitStore;
    use serde_json::json;

    fn flow(timeout: serde_json::Value) -> FlowDefinition {
        FlowDefinition::new(
            "ask",
            vec![
                Node::new("start", node_types::START).with_params(json!({
                    "branches": [{ "branch_id": "m", "trigger_type": "chat_message" }]
                })),
                Node::new("wait", node_types::WAIT_MESSAGE).with_params(json!({ "timeout": timeout })),
                Node::new("done", node_types::END)
                    .with_params(json!({ "outputs": { "answer": "{{ wait.message }}" } })),
            ],
            vec![Edge::branch("start", "wait", "m"), Edge::new("wait", "done")],
        )
    }

    #[test]
    fn test_interval_unit_conversion() {
        let t = |interval, unit| TimeoutConfig {
            enabled: true,
            interval,
            unit,
        };
        assert_eq!(t(90, TimeUnit::Second).interval_secs(), Some(90));
        assert_eq!(t(2, TimeUnit::Minute).interval_secs(), Some(120));
        assert_eq!(t(1, TimeUnit::Hour).interval_secs(), Some(3_600));
        assert_eq!(t(3, TimeUnit::Day).interval_secs(), Some(259_200));
        assert_eq!(TimeoutConfig::default().interval_secs(), None);
        assert_eq!(t(0, TimeUnit::Day).interval_secs(), None);
    }

    #[tokio::test]
    async fn test_mid_graph_persists_record_and_stops() {
        let h = Harness::new(vec![]);
        let f = flow(json!({ "enabled": true, "interval": 60, "unit": "second" }));
        let outcome = h.run(&f, &chat("first")).await;

        assert_eq!(outcome.status, RunStatus::Suspended { node_id: "wait".into() });
        assert_eq!(outcome.executed_ids(), vec!["start", "wait"]);
        assert!(outcome.context.node_output("wait").is_none());

        let record = h.store.find_by_scope(&scope()).await.unwrap().unwrap();
        assert_eq!(record.waiting_node_id, "wait");
        assert_eq!(record.flow_code, "ask");
        assert_eq!(record.creator, "u1");
        assert_eq!(record.origin_conversation_id, "conv");
        assert_eq!(record.timeout_at, Some(1_700_000_060));
        assert!(record.snapshot.contains("first"));
    }

    #[tokio::test]
    async fn test_entry_mode_emits_message_and_continues() {
        let f = flow(json!({}));
        let h = Harness::new(vec![f.clone()]);
        h.run(&f, &chat("first")).await;
        let record = h.store.find_by_scope(&scope()).await.unwrap().unwrap();
        assert_eq!(record.timeout_at, None);

        let outcome = match h.scheduler.resume(&record, &chat("Paris")).await.unwrap() {
            ResumeOutcome::Resumed(o) => o,
            ResumeOutcome::NoOp => panic!("expected resume"),
        };
        assert_eq!(outcome.executed_ids(), vec!["wait", "done"]);
        assert_eq!(outcome.context.node_output("wait").unwrap()["message"], json!("Paris"));
        assert_eq!(outcome.context.node_output("done").unwrap(), &json!({ "answer": "Paris" }));
        assert!(h.store.find_by_scope(&scope()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_record_resume_is_noop() {
        let f = flow(json!({ "enabled": true, "interval": 1, "unit": "minute" }));
        let h = Harness::new(vec![f.clone()]);
        h.run(&f, &chat("first")).await;
        let record = h.store.list_by_scope(&scope()).await.unwrap().remove(0);

        h.clock.advance_secs(60);
        assert!(h.store.find_by_scope(&scope()).await.unwrap().is_none());
        assert!(matches!(
            h.scheduler.resume(&record, &chat("late")).await.unwrap(),
            ResumeOutcome::NoOp
        ));
        assert!(h.store.list_by_scope(&scope()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stale_record_cannot_resume_a_later_suspension() {
        let f = flow(json!({}));
        let h = Harness::new(vec![f.clone()]);
        h.run(&f, &chat("first")).await;
        let stale = h.store.find_by_scope(&scope()).await.unwrap().unwrap();
        assert!(matches!(
            h.scheduler.resume(&stale, &chat("one")).await.unwrap(),
            ResumeOutcome::Resumed(_)
        ));

        // A new run parks at the same node in the same conversation.
        h.run(&f, &chat("second")).await;
        let fresh = h.store.find_by_scope(&scope()).await.unwrap().unwrap();
        assert_eq!(fresh.key(), stale.key());
        assert_ne!(fresh.record_id, stale.record_id);

        // A redelivery still holding the first record is dropped.
        assert!(matches!(
            h.scheduler.resume(&stale, &chat("one")).await.unwrap(),
            ResumeOutcome::NoOp
        ));
        assert_eq!(h.store.find_by_scope(&scope()).await.unwrap(), Some(fresh.clone()));

        let outcome = match h.scheduler.resume(&fresh, &chat("two")).await.unwrap() {
            ResumeOutcome::Resumed(o) => o,
            ResumeOutcome::NoOp => panic!("expected resume"),
        };
        assert_eq!(outcome.context.node_output("start").unwrap()["message"], json!("second"));
    }

    #[tokio::test]
    async fn test_expired_stale_record_leaves_newer_one() {
        let f = flow(json!({ "enabled": true, "interval": 1, "unit": "minute" }));
        let h = Harness::new(vec![f.clone()]);
        h.run(&f, &chat("first")).await;
        let stale = h.store.find_by_scope(&scope()).await.unwrap().unwrap();

        h.clock.advance_secs(60);
        h.run(&f, &chat("second")).await;
        let fresh = h.store.find_by_scope(&scope()).await.unwrap().unwrap();

        assert!(matches!(
            h.scheduler.resume(&stale, &chat("late")).await.unwrap(),
            ResumeOutcome::NoOp
        ));
        assert_eq!(h.store.find_by_scope(&scope()).await.unwrap(), Some(fresh));
    }
}
