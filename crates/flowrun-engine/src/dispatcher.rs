use std::sync::Arc;

use tracing::debug;

use flowrun_core::error::Result;
use flowrun_core::types::{TriggerEvent, TriggerType};

use crate::context::ExecutionContext;
use crate::scheduler::{DagScheduler, ResumeOutcome, RunOutcome};

/// What happened to a dispatched trigger.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// A fresh run of the flow.
    Ran(RunOutcome),
    /// A suspended run in the event's conversation continued.
    Resumed(RunOutcome),
    /// The matching wait record was claimed by someone else first.
    Dropped,
}

impl DispatchOutcome {
    pub fn run(&self) -> Option<&RunOutcome> {
        match self {
            Self::Ran(o) | Self::Resumed(o) => Some(o),
            Self::Dropped => None,
        }
    }
}

/// Trigger ingress.
///
/// A chat message in a conversation that has a live wait record resumes that
/// run; every other trigger starts a fresh run of the requested flow.
pub struct Dispatcher {
    scheduler: Arc<DagScheduler>,
}

impl Dispatcher {
    pub fn new(scheduler: Arc<DagScheduler>) -> Self {
        Self { scheduler }
    }

    pub fn scheduler(&self) -> &Arc<DagScheduler> {
        &self.scheduler
    }

    pub async fn dispatch(
        &self,
        flow_code: &str,
        version: Option<&str>,
        event: TriggerEvent,
    ) -> Result<DispatchOutcome> {
        let services = self.scheduler.services();

        if event.trigger_type == TriggerType::ChatMessage {
            if let Some(record) = services.wait_store.find_by_scope(&event.scope).await? {
                debug!(key = %record.key(), "Event matches a waiting run");
                return Ok(match self.scheduler.resume(&record, &event).await? {
                    ResumeOutcome::Resumed(outcome) => DispatchOutcome::Resumed(outcome),
                    ResumeOutcome::NoOp => DispatchOutcome::Dropped,
                });
            }
        }

        let flow = services.catalog.load(flow_code, version).await?;
        let ctx = ExecutionContext::new(&flow, &event);
        let outcome = self.scheduler.run(&flow, ctx).await?;
        Ok(DispatchOutcome::Ran(outcome))
    }
}
