use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use serde::Serialize;
use tracing::{debug, info, warn};

use flowrun_core::config::EngineConfig;
use flowrun_core::error::{FlowError, Result};
use flowrun_core::event::EventBus;
use flowrun_core::flow::FlowDefinition;
use flowrun_core::traits::{Clock, CodeExecutor, FlowCatalog, OutboundSink, SystemClock, WaitStore};
use flowrun_core::types::{FlowEvent, NodeId, RunId, TriggerEvent, TriggerType};
use flowrun_core::wait::WaitRecord;

use crate::context::ExecutionContext;
use crate::expression::{ExpressionResolver, PathResolver};
use crate::registry::NodeRegistry;
use crate::runner::{invoke, InvocationMode, ParentResult, UpstreamResults};
use crate::runners::reply::LogOutbound;
use crate::vertex::VertexResult;

/// External collaborators shared by every run.
#[derive(Clone)]
pub struct EngineServices {
    pub wait_store: Arc<dyn WaitStore>,
    pub catalog: Arc<dyn FlowCatalog>,
    pub resolver: Arc<dyn ExpressionResolver>,
    pub code_executor: Option<Arc<dyn CodeExecutor>>,
    pub outbound: Arc<dyn OutboundSink>,
    pub clock: Arc<dyn Clock>,
    pub event_bus: Arc<EventBus>,
}

impl EngineServices {
    /// Services with the path resolver, the system clock, and an outbound
    /// sink that only logs.
    pub fn new(wait_store: Arc<dyn WaitStore>, catalog: Arc<dyn FlowCatalog>) -> Self {
        Self {
            wait_store,
            catalog,
            resolver: Arc::new(PathResolver),
            code_executor: None,
            outbound: Arc::new(LogOutbound),
            clock: Arc::new(SystemClock),
            event_bus: Arc::new(EventBus::default()),
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn ExpressionResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_code_executor(mut self, executor: Arc<dyn CodeExecutor>) -> Self {
        self.code_executor = Some(executor);
        self
    }

    pub fn with_outbound(mut self, outbound: Arc<dyn OutboundSink>) -> Self {
        self.outbound = outbound;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = event_bus;
        self
    }
}

/// Deepest allowed nesting of loop bodies and sub-flows.
pub const MAX_WALK_DEPTH: usize = 8;

/// Overall status of a run invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    /// The frontier emptied with every executed node successful.
    Completed,
    /// A node persisted a wait record; a later event resumes the run.
    Suspended { node_id: NodeId },
    /// Run failed at node X with reason Y.
    Failed { node_id: NodeId, reason: String },
}

/// Record of one node invocation.
#[derive(Debug, Clone, Serialize)]
pub struct NodeExecution {
    pub node_id: NodeId,
    pub node_type: String,
    pub success: bool,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub debug_log: Vec<String>,
}

/// Result of one run invocation (a fresh run or a resume pass).
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub run_id: RunId,
    pub flow_code: String,
    #[serde(flatten)]
    pub status: RunStatus,
    /// Executed nodes in execution order.
    pub executed: Vec<NodeExecution>,
    pub context: ExecutionContext,
}

impl RunOutcome {
    pub fn executed_ids(&self) -> Vec<&str> {
        self.executed.iter().map(|e| e.node_id.as_str()).collect()
    }
}

/// Result of `DagScheduler::resume`.
#[derive(Debug, Clone)]
pub enum ResumeOutcome {
    Resumed(RunOutcome),
    /// The record was expired or already claimed. Not an error.
    NoOp,
}

/// Per-walk settings. Nested walks (loop bodies, sub-flows) cannot suspend.
#[derive(Debug, Clone, Copy)]
pub(crate) struct WalkOptions {
    pub appoint: Option<TriggerType>,
    pub allow_suspend: bool,
    pub depth: usize,
}

impl WalkOptions {
    pub fn top_level() -> Self {
        Self {
            appoint: None,
            allow_suspend: true,
            depth: 0,
        }
    }

    /// Options for a walk nested inside a node of this one.
    pub fn nested(depth: usize, appoint: Option<TriggerType>) -> Self {
        Self {
            appoint,
            allow_suspend: false,
            depth: depth + 1,
        }
    }
}

/// What a single walk did.
#[derive(Debug, Default)]
pub(crate) struct Walk {
    pub executed: Vec<NodeExecution>,
    pub suspended_at: Option<NodeId>,
    /// First failing node and its reason.
    pub failed: Option<(NodeId, String)>,
}

impl Walk {
    fn status(&self) -> RunStatus {
        if let Some((node_id, reason)) = &self.failed {
            RunStatus::Failed {
                node_id: node_id.clone(),
                reason: reason.clone(),
            }
        } else if let Some(node_id) = &self.suspended_at {
            RunStatus::Suspended {
                node_id: node_id.clone(),
            }
        } else {
            RunStatus::Completed
        }
    }
}

/// Walks a flow graph from an entry node.
///
/// The frontier is processed breadth-first in declaration order, one node at
/// a time. Each node's `VertexResult` decides which graph children join the
/// next frontier; a runner may narrow that set but never add to it.
///
/// Duplicate children are merged within a single frontier level only. A join
/// reached by paths of different lengths lands in different levels and runs
/// once per arrival.
pub struct DagScheduler {
    registry: NodeRegistry,
    services: EngineServices,
    config: EngineConfig,
}

impl DagScheduler {
    pub fn new(registry: NodeRegistry, services: EngineServices, config: EngineConfig) -> Self {
        Self {
            registry,
            services,
            config,
        }
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn services(&self) -> &EngineServices {
        &self.services
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Structural and registry checks, run before any node executes.
    pub fn check_flow(&self, flow: &FlowDefinition) -> Result<()> {
        flow.validate()?;
        for node in &flow.nodes {
            self.registry.resolve(&node.node_type, &node.version)?;
            if let Some(meta) = self.registry.meta(&node.node_type, &node.version) {
                for param in &meta.required_params {
                    if node.params.get(param).is_none() {
                        return Err(FlowError::Validation(format!(
                            "node {} ({}) is missing parameter '{}'",
                            node.id, node.node_type, param
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Run a flow from its top-level Start node.
    pub async fn run(&self, flow: &FlowDefinition, ctx: ExecutionContext) -> Result<RunOutcome> {
        self.check_flow(flow)?;
        let entry = flow
            .entry_node()
            .ok_or_else(|| FlowError::Validation(format!("flow {} has no entry node", flow.code)))?;

        info!(
            run_id = %ctx.run_id(),
            flow_code = %flow.code,
            trigger_type = %ctx.trigger_type(),
            "Run started"
        );
        self.services.event_bus.publish(FlowEvent::RunStarted {
            run_id: ctx.run_id().clone(),
            flow_code: flow.code.clone(),
            trigger_type: ctx.trigger_type(),
        });

        self.finish(flow, &entry.id, ctx).await
    }

    /// Run a flow starting at an arbitrary node, which executes in entry mode.
    pub async fn run_from(
        &self,
        flow: &FlowDefinition,
        node_id: &str,
        ctx: ExecutionContext,
    ) -> Result<RunOutcome> {
        self.check_flow(flow)?;
        flow.require_node(node_id)?;
        self.finish(flow, node_id, ctx).await
    }

    /// Resume a suspended run at its waiting node.
    ///
    /// The record is claimed with a compare-and-delete on its `record_id`
    /// before any node runs, so concurrent or redelivered events resume it at
    /// most once, even after a later suspension reuses the same key. Expired
    /// and already-claimed records yield `NoOp`.
    pub async fn resume(&self, record: &WaitRecord, event: &TriggerEvent) -> Result<ResumeOutcome> {
        let store = &self.services.wait_store;
        let key = record.key();

        if record.is_expired(self.services.clock.now()) {
            store.claim(record).await?;
            info!(key = %key, "Wait record expired, dropping resume");
            self.publish_dropped(record);
            return Ok(ResumeOutcome::NoOp);
        }

        let flow = self
            .services
            .catalog
            .load(&record.flow_code, Some(&record.flow_version))
            .await?;
        self.check_flow(&flow)?;
        flow.require_node(&record.waiting_node_id)?;
        let mut ctx = ExecutionContext::from_snapshot(&record.snapshot)?;

        if !store.claim(record).await? {
            debug!(key = %key, "Wait record already claimed");
            self.publish_dropped(record);
            return Ok(ResumeOutcome::NoOp);
        }

        ctx.apply_resume_event(event);
        info!(
            run_id = %ctx.run_id(),
            flow_code = %flow.code,
            node_id = %record.waiting_node_id,
            "Run resumed"
        );
        self.services.event_bus.publish(FlowEvent::RunResumed {
            run_id: ctx.run_id().clone(),
            flow_code: flow.code.clone(),
            node_id: record.waiting_node_id.clone(),
        });

        let outcome = self.finish(&flow, &record.waiting_node_id, ctx).await?;
        Ok(ResumeOutcome::Resumed(outcome))
    }

    fn publish_dropped(&self, record: &WaitRecord) {
        self.services.event_bus.publish(FlowEvent::ResumeDropped {
            conversation_id: record.conversation_id.clone(),
            node_id: record.waiting_node_id.clone(),
        });
    }

    /// Top-level walk plus status reporting.
    async fn finish(
        &self,
        flow: &FlowDefinition,
        entry: &str,
        mut ctx: ExecutionContext,
    ) -> Result<RunOutcome> {
        let walk = self.walk(flow, entry, &mut ctx, WalkOptions::top_level()).await?;
        let status = walk.status();
        let run_id = ctx.run_id().clone();

        match &status {
            RunStatus::Completed => {
                info!(run_id = %run_id, flow_code = %flow.code, nodes = walk.executed.len(), "Run completed");
                self.services.event_bus.publish(FlowEvent::RunCompleted {
                    run_id: run_id.clone(),
                    flow_code: flow.code.clone(),
                });
            }
            RunStatus::Suspended { node_id } => {
                info!(run_id = %run_id, flow_code = %flow.code, node_id = %node_id, "Run suspended");
                self.services.event_bus.publish(FlowEvent::RunSuspended {
                    run_id: run_id.clone(),
                    flow_code: flow.code.clone(),
                    node_id: node_id.clone(),
                });
            }
            RunStatus::Failed { node_id, reason } => {
                warn!(run_id = %run_id, flow_code = %flow.code, node_id = %node_id, reason = %reason, "Run failed");
                self.services.event_bus.publish(FlowEvent::RunFailed {
                    run_id: run_id.clone(),
                    flow_code: flow.code.clone(),
                    node_id: node_id.clone(),
                    reason: reason.clone(),
                });
            }
        }

        Ok(RunOutcome {
            run_id,
            flow_code: flow.code.clone(),
            status,
            executed: walk.executed,
            context: ctx,
        })
    }

    /// Walk from `entry` until the frontier is empty.
    ///
    /// Node failures never escape as `Err`: they end up in `Walk::failed` and
    /// prune the failing node's subtree while sibling branches continue.
    pub(crate) fn walk<'a>(
        &'a self,
        flow: &'a FlowDefinition,
        entry: &'a str,
        ctx: &'a mut ExecutionContext,
        opts: WalkOptions,
    ) -> BoxFuture<'a, Result<Walk>> {
        Box::pin(async move {
            if opts.depth > MAX_WALK_DEPTH {
                return Err(FlowError::Validation(format!(
                    "nesting deeper than {} levels at {}",
                    MAX_WALK_DEPTH, entry
                )));
            }
            let mut walk = Walk::default();
            let mut frontier: Vec<(NodeId, UpstreamResults)> = vec![(
                entry.to_string(),
                UpstreamResults {
                    parents: vec![],
                    appoint_trigger_type: opts.appoint,
                },
            )];
            let mut mode = InvocationMode::Entry;
            let mut executions = 0usize;

            'walk: while !frontier.is_empty() {
                let mut next: Vec<(NodeId, UpstreamResults)> = Vec::new();

                for (node_id, upstream) in frontier {
                    let node = flow.require_node(&node_id)?;
                    let mut vertex = VertexResult::new(&node.id);
                    let started = Instant::now();
                    executions += 1;

                    let over_limit = executions > self.config.max_node_executions;
                    let failure = if over_limit {
                        Some(format!(
                            "exceeded max_node_executions ({})",
                            self.config.max_node_executions
                        ))
                    } else {
                        debug!(run_id = %ctx.run_id(), node_id = %node.id, node_type = %node.node_type, "Executing node");
                        invoke(self, flow, node, mode, &upstream, &opts, &mut vertex, ctx)
                            .await
                            .err()
                            .map(|e| e.to_string())
                    };
                    mode = InvocationMode::Forward;

                    if let Some(reason) = &failure {
                        warn!(
                            run_id = %ctx.run_id(),
                            node_id = %node.id,
                            node_type = %node.node_type,
                            error = %reason,
                            "Node failed"
                        );
                        vertex.fail(reason.clone());
                    }

                    let elapsed_ms = started.elapsed().as_millis() as u64;
                    self.services.event_bus.publish(FlowEvent::NodeFinished {
                        run_id: ctx.run_id().clone(),
                        node_id: node.id.clone(),
                        node_type: node.node_type.clone(),
                        success: vertex.success(),
                        elapsed_ms,
                    });
                    walk.executed.push(NodeExecution {
                        node_id: node.id.clone(),
                        node_type: node.node_type.clone(),
                        success: vertex.success(),
                        elapsed_ms,
                        debug_log: vertex.debug_log().to_vec(),
                    });

                    if let Some(reason) = failure {
                        if walk.failed.is_none() {
                            walk.failed = Some((node.id.clone(), reason));
                        }
                        if over_limit {
                            break 'walk;
                        }
                        continue;
                    }
                    if vertex.is_suspended() {
                        walk.suspended_at.get_or_insert_with(|| node.id.clone());
                        continue;
                    }

                    let kept = vertex.resolve_children(&flow.children(&node.id));
                    for child in kept {
                        let parent = ParentResult {
                            node_id: node.id.clone(),
                            result: vertex.result().cloned(),
                        };
                        match next.iter_mut().find(|(id, _)| *id == child) {
                            Some((_, up)) => up.parents.push(parent),
                            None => next.push((
                                child,
                                UpstreamResults {
                                    parents: vec![parent],
                                    appoint_trigger_type: None,
                                },
                            )),
                        }
                    }
                }

                frontier = next;
            }

            Ok(walk)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::NodeMeta;
    use crate::runner::{NodeInvocation, NodeRunner};
    use flowrun_core::flow::{node_types, Edge, Node};
    use flowrun_core::types::{ConversationScope, Operator};
    use flowrun_store::{MemoryFlowCatalog, MemoryWaitStore};
    use flowrun_test_utils::ManualClock;
    use serde_json::json;

    /// Emits `{"n": <id>}` and keeps every child.
    #[derive(Default)]
    struct Echo;

    impl NodeRunner for Echo {
        fn execute<'a>(
            &'a self,
            inv: &'a NodeInvocation<'a>,
            vertex: &'a mut VertexResult,
            _ctx: &'a mut ExecutionContext,
        ) -> BoxFuture<'a, Result<()>> {
            Box::pin(async move {
                vertex.set_result(json!({ "n": inv.node.id }));
                Ok(())
            })
        }
    }

    /// Always fails.
    #[derive(Default)]
    struct Boom;

    impl NodeRunner for Boom {
        fn execute<'a>(
            &'a self,
            inv: &'a NodeInvocation<'a>,
            _vertex: &'a mut VertexResult,
            _ctx: &'a mut ExecutionContext,
        ) -> BoxFuture<'a, Result<()>> {
            Box::pin(async move { Err(FlowError::runner(&inv.node.id, "boom")) })
        }
    }

    /// Keeps only the children listed in `params.keep`.
    #[derive(Default)]
    struct Pick;

    impl NodeRunner for Pick {
        fn execute<'a>(
            &'a self,
            inv: &'a NodeInvocation<'a>,
            vertex: &'a mut VertexResult,
            _ctx: &'a mut ExecutionContext,
        ) -> BoxFuture<'a, Result<()>> {
            Box::pin(async move {
                let keep: Vec<String> = serde_json::from_value(inv.node.params["keep"].clone())?;
                vertex.set_result(json!({ "kept": keep }));
                vertex.set_children(keep);
                Ok(())
            })
        }
    }

    fn scheduler_with(flows: Vec<FlowDefinition>) -> (DagScheduler, Arc<MemoryWaitStore>) {
        let mut registry = NodeRegistry::with_builtins();
        registry.register_runner::<Echo>("echo", "v0", NodeMeta::new("test"));
        registry.register_runner::<Boom>("boom", "v0", NodeMeta::new("test"));
        registry.register_runner::<Pick>("pick", "v0", NodeMeta::new("test"));

        let clock = Arc::new(ManualClock::at_epoch(1_700_000_000));
        let store = Arc::new(MemoryWaitStore::new(clock.clone()));
        let catalog = Arc::new(MemoryFlowCatalog::from_flows(flows));
        let services = EngineServices::new(store.clone(), catalog).with_clock(clock);
        (
            DagScheduler::new(registry, services, EngineConfig::default()),
            store,
        )
    }

    fn start(branch_trigger: &str) -> Node {
        Node::new("start", node_types::START).with_params(json!({
            "branches": [{ "branch_id": "b", "trigger_type": branch_trigger }]
        }))
    }

    fn chat() -> TriggerEvent {
        TriggerEvent::chat_message(ConversationScope::new("org", "conv"), "hello")
            .with_operator(Operator::new("u1"))
    }

    fn linear() -> FlowDefinition {
        FlowDefinition::new(
            "linear",
            vec![
                start("chat_message"),
                Node::new("a", "echo"),
                Node::new("b", "echo"),
            ],
            vec![Edge::branch("start", "a", "b"), Edge::new("a", "b")],
        )
    }

    #[tokio::test]
    async fn test_linear_run_records_every_node() {
        let flow = linear();
        let (scheduler, _) = scheduler_with(vec![]);
        let outcome = scheduler
            .run(&flow, ExecutionContext::new(&flow, &chat()))
            .await
            .unwrap();

        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(outcome.executed_ids(), vec!["start", "a", "b"]);
        assert_eq!(outcome.context.node_output("a"), Some(&json!({ "n": "a" })));
        assert_eq!(outcome.context.node_output("b"), Some(&json!({ "n": "b" })));
    }

    #[tokio::test]
    async fn test_unknown_node_type_surfaces_before_execution() {
        let mut flow = linear();
        flow.nodes.push(Node::new("x", "text2image"));
        let (scheduler, _) = scheduler_with(vec![]);
        let mut rx = scheduler.services().event_bus.subscribe();

        let err = scheduler
            .run(&flow, ExecutionContext::new(&flow, &chat()))
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::UnknownNodeType { .. }));
        assert!(rx.try_recv().is_err(), "no node may run");
    }

    #[tokio::test]
    async fn test_failure_prunes_subtree_but_not_siblings() {
        let flow = FlowDefinition::new(
            "fanout",
            vec![
                start("chat_message"),
                Node::new("split", "echo"),
                Node::new("bad", "boom"),
                Node::new("after_bad", "echo"),
                Node::new("good", "echo"),
            ],
            vec![
                Edge::branch("start", "split", "b"),
                Edge::new("split", "bad"),
                Edge::new("split", "good"),
                Edge::new("bad", "after_bad"),
            ],
        );
        let (scheduler, _) = scheduler_with(vec![]);
        let outcome = scheduler
            .run(&flow, ExecutionContext::new(&flow, &chat()))
            .await
            .unwrap();

        assert_eq!(outcome.executed_ids(), vec!["start", "split", "bad", "good"]);
        match outcome.status {
            RunStatus::Failed { node_id, reason } => {
                assert_eq!(node_id, "bad");
                assert!(reason.contains("boom"));
            }
            other => panic!("unexpected status {:?}", other),
        }
        let bad = &outcome.executed[2];
        assert!(!bad.success);
        assert!(bad.debug_log[0].starts_with("failed:"));
    }

    #[tokio::test]
    async fn test_narrowing_to_k_of_n_children() {
        let flow = FlowDefinition::new(
            "pick",
            vec![
                start("chat_message"),
                Node::new("p", "pick").with_params(json!({ "keep": ["c2", "c4", "nowhere"] })),
                Node::new("c1", "echo"),
                Node::new("c2", "echo"),
                Node::new("c3", "echo"),
                Node::new("c4", "echo"),
            ],
            vec![
                Edge::branch("start", "p", "b"),
                Edge::new("p", "c1"),
                Edge::new("p", "c2"),
                Edge::new("p", "c3"),
                Edge::new("p", "c4"),
            ],
        );
        let (scheduler, _) = scheduler_with(vec![]);
        let outcome = scheduler
            .run(&flow, ExecutionContext::new(&flow, &chat()))
            .await
            .unwrap();
        assert_eq!(outcome.executed_ids(), vec!["start", "p", "c2", "c4"]);
    }

    #[tokio::test]
    async fn test_diamond_runs_join_once() {
        let flow = FlowDefinition::new(
            "diamond",
            vec![
                start("chat_message"),
                Node::new("l", "echo"),
                Node::new("r", "echo"),
                Node::new("join", "echo"),
            ],
            vec![
                Edge::branch("start", "l", "b"),
                Edge::branch("start", "r", "b"),
                Edge::new("l", "join"),
                Edge::new("r", "join"),
            ],
        );
        let (scheduler, _) = scheduler_with(vec![]);
        let outcome = scheduler
            .run(&flow, ExecutionContext::new(&flow, &chat()))
            .await
            .unwrap();
        assert_eq!(outcome.executed_ids(), vec!["start", "l", "r", "join"]);
    }

    #[tokio::test]
    async fn test_cycle_bounded_by_max_node_executions() {
        let flow = FlowDefinition::new(
            "cycle",
            vec![start("chat_message"), Node::new("a", "echo"), Node::new("b", "echo")],
            vec![
                Edge::branch("start", "a", "b"),
                Edge::new("a", "b"),
                Edge::new("b", "a"),
            ],
        );
        let (mut scheduler, _) = scheduler_with(vec![]);
        scheduler.config.max_node_executions = 10;
        let outcome = scheduler
            .run(&flow, ExecutionContext::new(&flow, &chat()))
            .await
            .unwrap();

        assert_eq!(outcome.executed.len(), 11);
        assert!(matches!(outcome.status, RunStatus::Failed { .. }));
    }

    #[tokio::test]
    async fn test_no_matching_trigger_ends_quietly() {
        let flow = linear();
        let (scheduler, _) = scheduler_with(vec![]);
        let event = TriggerEvent::new(TriggerType::AddFriend, ConversationScope::new("org", "conv"));
        let outcome = scheduler
            .run(&flow, ExecutionContext::new(&flow, &event))
            .await
            .unwrap();
        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(outcome.executed_ids(), vec!["start"]);
    }

    fn waiting() -> FlowDefinition {
        FlowDefinition::new(
            "waiting",
            vec![
                start("chat_message"),
                Node::new("wait", node_types::WAIT_MESSAGE),
                Node::new("c", "echo"),
            ],
            vec![Edge::branch("start", "wait", "b"), Edge::new("wait", "c")],
        )
    }

    #[tokio::test]
    async fn test_suspend_then_resume_once() {
        let flow = waiting();
        let (scheduler, store) = scheduler_with(vec![flow.clone()]);

        let first = scheduler
            .run(&flow, ExecutionContext::new(&flow, &chat()))
            .await
            .unwrap();
        assert_eq!(first.status, RunStatus::Suspended { node_id: "wait".into() });
        assert_eq!(first.executed_ids(), vec!["start", "wait"]);
        assert!(first.context.node_output("wait").is_none());

        let scope = ConversationScope::new("org", "conv");
        let record = store.find_by_scope(&scope).await.unwrap().unwrap();
        let reply = TriggerEvent::chat_message(scope.clone(), "second");

        let resumed = match scheduler.resume(&record, &reply).await.unwrap() {
            ResumeOutcome::Resumed(o) => o,
            ResumeOutcome::NoOp => panic!("expected resume"),
        };
        assert_eq!(resumed.status, RunStatus::Completed);
        assert_eq!(resumed.run_id, first.run_id);
        assert_eq!(resumed.executed_ids(), vec!["wait", "c"]);
        assert_eq!(resumed.context.node_output("wait").unwrap()["message"], json!("second"));
        assert_eq!(
            resumed.context.node_output("start"),
            first.context.node_output("start")
        );

        assert!(matches!(
            scheduler.resume(&record, &reply).await.unwrap(),
            ResumeOutcome::NoOp
        ));
    }
}
