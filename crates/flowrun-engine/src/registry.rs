use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use flowrun_core::error::{FlowError, Result};
use flowrun_core::flow::node_types;

use crate::runner::NodeRunner;
use crate::runners;

/// Builds a fresh runner for one invocation.
pub type RunnerFactory = Arc<dyn Fn() -> Box<dyn NodeRunner> + Send + Sync>;

/// Static description of a registered node type.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NodeMeta {
    pub description: String,
    /// Parameter keys the node cannot run without.
    pub required_params: Vec<String>,
    pub outputs: Vec<String>,
    /// Whether the node can be executed alone in single-step debug.
    pub supports_debug: bool,
}

impl NodeMeta {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Default::default()
        }
    }

    pub fn with_required_params(mut self, params: &[&str]) -> Self {
        self.required_params = params.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_outputs(mut self, outputs: &[&str]) -> Self {
        self.outputs = outputs.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn debuggable(mut self) -> Self {
        self.supports_debug = true;
        self
    }
}

struct Entry {
    factory: RunnerFactory,
    meta: NodeMeta,
}

/// Lookup table from `(type, version)` to a runner factory and metadata.
///
/// Populated once at startup and read-only afterwards.
pub struct NodeRegistry {
    entries: HashMap<(String, String), Entry>,
    allow_version_fallback: bool,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            allow_version_fallback: false,
        }
    }

    /// Resolve an unregistered version to the newest older one of the same
    /// type instead of failing.
    pub fn with_version_fallback(mut self, enabled: bool) -> Self {
        self.allow_version_fallback = enabled;
        self
    }

    /// Register a factory. Replaces any existing registration for the pair.
    pub fn register(
        &mut self,
        node_type: impl Into<String>,
        version: impl Into<String>,
        factory: RunnerFactory,
        meta: NodeMeta,
    ) {
        self.entries
            .insert((node_type.into(), version.into()), Entry { factory, meta });
    }

    /// Register a stateless runner type.
    pub fn register_runner<R>(&mut self, node_type: &str, version: &str, meta: NodeMeta)
    where
        R: NodeRunner + Default + 'static,
    {
        self.register(
            node_type,
            version,
            Arc::new(|| Box::new(R::default()) as Box<dyn NodeRunner>),
            meta,
        );
    }

    /// Find the factory for a node type and version.
    pub fn resolve(&self, node_type: &str, version: &str) -> Result<RunnerFactory> {
        self.entry(node_type, version)
            .map(|e| e.factory.clone())
            .ok_or_else(|| FlowError::UnknownNodeType {
                node_type: node_type.to_string(),
                version: version.to_string(),
            })
    }

    /// Metadata for a node type and version, following the same fallback rule
    /// as `resolve`.
    pub fn meta(&self, node_type: &str, version: &str) -> Option<&NodeMeta> {
        self.entry(node_type, version).map(|e| &e.meta)
    }

    /// Every registration, sorted by type then version.
    pub fn metadata(&self) -> Vec<(&str, &str, &NodeMeta)> {
        let mut out: Vec<_> = self
            .entries
            .iter()
            .map(|((t, v), e)| (t.as_str(), v.as_str(), &e.meta))
            .collect();
        out.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
        out
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&self, node_type: &str, version: &str) -> Option<&Entry> {
        if let Some(entry) = self
            .entries
            .get(&(node_type.to_string(), version.to_string()))
        {
            return Some(entry);
        }
        if !self.allow_version_fallback {
            return None;
        }

        let requested = parse_version(version)?;
        let ((_, found), entry) = self
            .entries
            .iter()
            .filter(|((t, _), _)| t == node_type)
            .filter_map(|(k, e)| parse_version(&k.1).map(|n| (n, k, e)))
            .filter(|(n, _, _)| *n < requested)
            .max_by_key(|(n, _, _)| *n)
            .map(|(_, k, e)| (k, e))?;
        debug!(node_type, requested = version, found = %found, "Falling back to older runner version");
        Some(entry)
    }

    /// Create a registry with all built-in runners registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();

        // ── Entry and suspension ────────────────────────────────
        registry.register_runner::<runners::start::StartRunner>(
            node_types::START,
            "v0",
            NodeMeta::new("Selects the branch matching the trigger type")
                .with_required_params(&["branches"])
                .with_outputs(&["trigger_type", "conversation_id", "organization_code"]),
        );
        registry.register_runner::<runners::wait_message::WaitMessageRunner>(
            node_types::WAIT_MESSAGE,
            "v0",
            NodeMeta::new("Suspends the run until the next chat message")
                .with_outputs(&["trigger_type", "message"]),
        );

        // ── Control flow ────────────────────────────────────────
        registry.register_runner::<runners::if_else::IfElseRunner>(
            node_types::IF_ELSE,
            "v0",
            NodeMeta::new("Follows the first branch whose conditions hold")
                .with_required_params(&["branches"])
                .with_outputs(&["branch_id"])
                .debuggable(),
        );
        registry.register_runner::<runners::loop_node::LoopRunner>(
            node_types::LOOP,
            "v0",
            NodeMeta::new("Walks the loop body once per item")
                .with_outputs(&["iterations"]),
        );
        registry.register_runner::<runners::sub_flow::SubFlowRunner>(
            node_types::SUB_FLOW,
            "v0",
            NodeMeta::new("Runs another flow and returns its end output")
                .with_required_params(&["flow_code"]),
        );
        registry.register_runner::<runners::end::EndRunner>(
            node_types::END,
            "v0",
            NodeMeta::new("Terminates the branch with the resolved outputs").debuggable(),
        );

        // ── Side effects ────────────────────────────────────────
        registry.register_runner::<runners::code::CodeRunner>(
            node_types::CODE,
            "v0",
            NodeMeta::new("Runs a snippet in the external sandbox")
                .with_required_params(&["code"])
                .debuggable(),
        );
        registry.register_runner::<runners::reply::ReplyRunner>(
            node_types::REPLY_MESSAGE,
            "v0",
            NodeMeta::new("Sends a message to the run's conversation")
                .with_required_params(&["content"])
                .with_outputs(&["content"]),
        );
        registry.register_runner::<runners::variable::VariableSaveRunner>(
            node_types::VARIABLE_SAVE,
            "v0",
            NodeMeta::new("Assigns run-scoped global variables")
                .with_required_params(&["variables"])
                .debuggable(),
        );

        registry
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_version(version: &str) -> Option<u32> {
    version.strip_prefix('v')?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionContext;
    use crate::runner::NodeInvocation;
    use crate::vertex::VertexResult;
    use futures::future::BoxFuture;

    #[derive(Default)]
    struct Noop;

    impl NodeRunner for Noop {
        fn execute<'a>(
            &'a self,
            _invocation: &'a NodeInvocation<'a>,
            _vertex: &'a mut VertexResult,
            _ctx: &'a mut ExecutionContext,
        ) -> BoxFuture<'a, Result<()>> {
            Box::pin(async { Ok(()) })
        }
    }

    #[test]
    fn test_builtins_registered() {
        let registry = NodeRegistry::with_builtins();
        for t in [
            node_types::START,
            node_types::WAIT_MESSAGE,
            node_types::IF_ELSE,
            node_types::CODE,
            node_types::REPLY_MESSAGE,
            node_types::VARIABLE_SAVE,
            node_types::LOOP,
            node_types::SUB_FLOW,
            node_types::END,
        ] {
            assert!(registry.resolve(t, "v0").is_ok(), "missing {}", t);
        }
        assert_eq!(registry.len(), 9);
    }

    #[test]
    fn test_unknown_type_fails() {
        let registry = NodeRegistry::with_builtins();
        let err = registry.resolve("text2image", "v0").err().unwrap();
        assert!(matches!(err, FlowError::UnknownNodeType { .. }));
    }

    #[test]
    fn test_no_implicit_version_coercion() {
        let registry = NodeRegistry::with_builtins();
        assert!(matches!(
            registry.resolve(node_types::START, "v1"),
            Err(FlowError::UnknownNodeType { .. })
        ));
    }

    #[test]
    fn test_version_fallback_picks_newest_older() {
        let mut registry = NodeRegistry::new().with_version_fallback(true);
        registry.register_runner::<Noop>("x", "v0", NodeMeta::new("zero"));
        registry.register_runner::<Noop>("x", "v2", NodeMeta::new("two"));
        registry.register_runner::<Noop>("x", "v5", NodeMeta::new("five"));

        assert_eq!(registry.meta("x", "v4").unwrap().description, "two");
        assert_eq!(registry.meta("x", "v2").unwrap().description, "two");
        assert!(registry.resolve("x", "v9").is_ok());
        assert!(registry.resolve("x", "latest").is_err());
        assert!(registry.resolve("y", "v1").is_err());
    }

    #[test]
    fn test_metadata_sorted() {
        let mut registry = NodeRegistry::new();
        registry.register_runner::<Noop>("b", "v0", NodeMeta::new(""));
        registry.register_runner::<Noop>("a", "v1", NodeMeta::new(""));
        registry.register_runner::<Noop>("a", "v0", NodeMeta::new(""));
        let keys: Vec<_> = registry.metadata().iter().map(|(t, v, _)| (*t, *v)).collect();
        assert_eq!(keys, vec![("a", "v0"), ("a", "v1"), ("b", "v0")]);
    }
}
