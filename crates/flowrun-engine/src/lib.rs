//! Flow execution engine.
//!
//! A run walks a `FlowDefinition` from a Start node. Each node is dispatched
//! through the `NodeRegistry` to a `NodeRunner`, which fills in a
//! `VertexResult` and records its output in the run's `ExecutionContext`.
//! The `DagScheduler` expands the frontier through the children each node
//! keeps, until the frontier is empty or a WaitMessage node suspends the run
//! into the `WaitStore`. A later `TriggerEvent` resumes it through the
//! `Dispatcher`.

pub mod condition;
pub mod context;
pub mod dispatcher;
pub mod expression;
pub mod reaper;
pub mod registry;
pub mod routine;
pub mod runner;
pub mod runners;
pub mod scheduler;
pub mod vertex;

pub use context::ExecutionContext;
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use expression::{ExpressionResolver, PathResolver};
pub use reaper::WaitReaper;
pub use registry::{NodeMeta, NodeRegistry, RunnerFactory};
pub use routine::RoutineScheduler;
pub use runner::{InvocationMode, NodeInvocation, NodeRunner, ParentResult, UpstreamResults};
pub use scheduler::{
    DagScheduler, EngineServices, NodeExecution, ResumeOutcome, RunOutcome, RunStatus,
};
pub use vertex::{Children, VertexResult};
