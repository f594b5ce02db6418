use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cron::Schedule;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use flowrun_core::config::RoutineConfig;
use flowrun_core::error::{FlowError, Result};
use flowrun_core::types::{ConversationScope, TriggerEvent, TriggerType};

use crate::dispatcher::{DispatchOutcome, Dispatcher};

struct RoutineJob {
    name: String,
    schedule: Schedule,
    flow_code: String,
    flow_version: Option<String>,
    scope: ConversationScope,
    payload: serde_json::Value,
}

impl RoutineJob {
    fn event(&self) -> TriggerEvent {
        TriggerEvent::new(TriggerType::Routine, self.scope.clone()).with_payload(self.payload.clone())
    }
}

/// Fires `routine` triggers on cron schedules.
pub struct RoutineScheduler {
    jobs: Vec<RoutineJob>,
    dispatcher: Arc<Dispatcher>,
    cancel: CancellationToken,
}

impl RoutineScheduler {
    pub fn new(config: &RoutineConfig, dispatcher: Arc<Dispatcher>, cancel: CancellationToken) -> Self {
        let mut jobs = Vec::new();

        for job_config in &config.jobs {
            match Schedule::from_str(&job_config.schedule) {
                Ok(schedule) => {
                    jobs.push(RoutineJob {
                        name: job_config.name.clone(),
                        schedule,
                        flow_code: job_config.flow_code.clone(),
                        flow_version: job_config.flow_version.clone(),
                        scope: ConversationScope::new(
                            &job_config.organization_code,
                            &job_config.conversation_id,
                        ),
                        payload: job_config
                            .payload
                            .clone()
                            .unwrap_or_else(|| serde_json::json!({})),
                    });
                    info!(name = %job_config.name, schedule = %job_config.schedule, "Routine registered");
                }
                Err(e) => {
                    warn!(
                        name = %job_config.name,
                        schedule = %job_config.schedule,
                        error = %e,
                        "Invalid cron expression, skipping routine"
                    );
                }
            }
        }

        Self {
            jobs,
            dispatcher,
            cancel,
        }
    }

    pub fn job_names(&self) -> Vec<&str> {
        self.jobs.iter().map(|j| j.name.as_str()).collect()
    }

    /// Fire one routine immediately.
    pub async fn fire(&self, name: &str) -> Result<DispatchOutcome> {
        let job = self
            .jobs
            .iter()
            .find(|j| j.name == name)
            .ok_or_else(|| FlowError::Config(format!("no routine named {}", name)))?;
        self.fire_job(job).await
    }

    async fn fire_job(&self, job: &RoutineJob) -> Result<DispatchOutcome> {
        info!(job = %job.name, flow_code = %job.flow_code, "Firing routine");
        self.dispatcher
            .dispatch(&job.flow_code, job.flow_version.as_deref(), job.event())
            .await
    }

    /// Run the scheduler loop. Blocks until cancelled.
    pub async fn run(&self) {
        if self.jobs.is_empty() {
            info!("No routines configured, scheduler idle");
            self.cancel.cancelled().await;
            return;
        }

        info!(count = self.jobs.len(), "Routine scheduler started");

        loop {
            let now = Utc::now();
            let next_fire = self
                .jobs
                .iter()
                .filter_map(|job| job.schedule.upcoming(Utc).next().map(|at| (at, job)))
                .min_by_key(|(at, _)| *at);

            let Some((fire_at, job)) = next_fire else {
                self.cancel.cancelled().await;
                break;
            };
            let delay = (fire_at - now).to_std().unwrap_or(Duration::from_secs(1));

            info!(
                job = %job.name,
                fire_at = %fire_at.format("%H:%M:%S"),
                delay_secs = delay.as_secs(),
                "Next routine scheduled"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    match self.fire_job(job).await {
                        Ok(outcome) => match outcome.run() {
                            Some(run) => info!(job = %job.name, status = ?run.status, "Routine finished"),
                            None => info!(job = %job.name, "Routine dropped"),
                        },
                        Err(e) => error!(job = %job.name, error = %e, "Routine failed"),
                    }
                }
                _ = self.cancel.cancelled() => {
                    info!("Routine scheduler shutting down");
                    break;
                }
            }
        }
    }
}
