use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use flowrun_core::config::ReaperConfig;
use flowrun_core::error::Result;
use flowrun_core::event::EventBus;
use flowrun_core::traits::{Clock, WaitStore};
use flowrun_core::types::FlowEvent;
use flowrun_core::wait::WaitRecord;

use crate::scheduler::EngineServices;

/// Periodic removal of wait records past their timeout.
///
/// Once reaped a record can no longer be found or resumed; a late reply in
/// that conversation starts a fresh run instead.
pub struct WaitReaper {
    store: Arc<dyn WaitStore>,
    clock: Arc<dyn Clock>,
    event_bus: Arc<EventBus>,
    interval: Duration,
    cancel: CancellationToken,
}

impl WaitReaper {
    pub fn new(services: &EngineServices, config: &ReaperConfig, cancel: CancellationToken) -> Self {
        Self {
            store: services.wait_store.clone(),
            clock: services.clock.clone(),
            event_bus: services.event_bus.clone(),
            interval: Duration::from_secs(config.interval_secs),
            cancel,
        }
    }

    /// Reap every expired record once.
    pub async fn reap_once(&self) -> Result<Vec<WaitRecord>> {
        let reaped = self.store.reap_expired(self.clock.now()).await?;
        for record in &reaped {
            info!(
                key = %record.key(),
                flow_code = %record.flow_code,
                timeout_at = ?record.timeout_at,
                "Wait record expired"
            );
            self.event_bus.publish(FlowEvent::WaitExpired {
                conversation_id: record.conversation_id.clone(),
                node_id: record.waiting_node_id.clone(),
                flow_code: record.flow_code.clone(),
            });
        }
        Ok(reaped)
    }

    /// Run the reaper loop. Blocks until cancelled.
    pub async fn run(&self) {
        info!(interval_secs = self.interval.as_secs(), "Wait reaper started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = self.cancel.cancelled() => {
                    info!("Wait reaper shutting down");
                    break;
                }
            }

            if let Err(e) = self.reap_once().await {
                error!(error = %e, "Reaping wait records failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runners::testing::{chat, scope, Harness};
    use flowrun_core::flow::{node_types, Edge, FlowDefinition, Node};
    use serde_json::json;

    fn flow() -> FlowDefinition {
        FlowDefinition::new(
            "timed",
            vec![
                Node::new("start", node_types::START).with_params(json!({
                    "branches": [{ "branch_id": "m", "trigger_type": "chat_message" }]
                })),
                Node::new("wait", node_types::WAIT_MESSAGE).with_params(json!({
                    "timeout": { "enabled": true, "interval": 60, "unit": "second" }
                })),
            ],
            vec![Edge::branch("start", "wait", "m")],
        )
    }

    fn reaper(h: &Harness, cancel: CancellationToken) -> WaitReaper {
        WaitReaper::new(
            h.scheduler.services(),
            &ReaperConfig {
                enabled: true,
                interval_secs: 1,
            },
            cancel,
        )
    }

    #[tokio::test]
    async fn test_reap_once_only_takes_expired() {
        let h = Harness::new(vec![]);
        h.run(&flow(), &chat("hi")).await;
        let reaper = reaper(&h, CancellationToken::new());
        let mut rx = h.scheduler.services().event_bus.subscribe();

        h.clock.advance_secs(59);
        assert!(reaper.reap_once().await.unwrap().is_empty());
        assert!(h.store.find_by_scope(&scope()).await.unwrap().is_some());

        h.clock.advance_secs(1);
        let reaped = reaper.reap_once().await.unwrap();
        assert_eq!(reaped.len(), 1);
        assert!(h.store.list_by_scope(&scope()).await.unwrap().is_empty());
        assert!(matches!(
            rx.recv().await.unwrap(),
            FlowEvent::WaitExpired { ref node_id, .. } if node_id == "wait"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_reaps_until_cancelled() {
        let h = Harness::new(vec![]);
        h.run(&flow(), &chat("hi")).await;
        h.clock.advance_secs(120);

        let cancel = CancellationToken::new();
        let reaper = Arc::new(reaper(&h, cancel.clone()));
        let task = tokio::spawn({
            let reaper = reaper.clone();
            async move { reaper.run().await }
        });

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(h.store.is_empty());

        cancel.cancel();
        task.await.unwrap();
    }
}
