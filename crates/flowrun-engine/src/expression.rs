//! Expression resolution against the node context.
//!
//! An expression is a path rooted at a node id, e.g. `llm_1.text` or
//! `fetch.items[0].title`. Two roots are reserved: `trigger` reads the
//! trigger payload and `variables` reads the run's global variables.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use flowrun_core::error::{FlowError, Result};

use crate::context::ExecutionContext;

/// Resolves an expression to a value, or fails with `UnresolvedReference`.
pub trait ExpressionResolver: Send + Sync + 'static {
    fn resolve(&self, expr: &str, ctx: &ExecutionContext) -> Result<Value>;
}

/// Dotted/indexed path resolver.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathResolver;

#[derive(Debug, PartialEq)]
enum Segment<'a> {
    Field(&'a str),
    Index(usize),
}

impl ExpressionResolver for PathResolver {
    fn resolve(&self, expr: &str, ctx: &ExecutionContext) -> Result<Value> {
        let expr = expr.trim();
        let unresolved = || FlowError::UnresolvedReference(expr.to_string());

        let (root, segments) = parse_path(expr).ok_or_else(unresolved)?;

        let variables;
        let base = match root {
            "trigger" => ctx.trigger_payload(),
            "variables" => {
                variables = Value::Object(ctx.variables().clone());
                &variables
            }
            node_id => ctx.node_output(node_id).ok_or_else(unresolved)?,
        };

        let mut current = base;
        for segment in &segments {
            current = match segment {
                Segment::Field(name) => current.get(*name),
                Segment::Index(i) => current.get(*i),
            }
            .ok_or_else(unresolved)?;
        }
        Ok(current.clone())
    }
}

/// Split `root.a[0].b` into its root and segments.
fn parse_path(expr: &str) -> Option<(&str, Vec<Segment<'_>>)> {
    let root_end = expr.find(['.', '[']).unwrap_or(expr.len());
    let root = &expr[..root_end];
    if root.is_empty() {
        return None;
    }

    let mut segments = Vec::new();
    let mut rest = &expr[root_end..];
    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix('.') {
            let end = after.find(['.', '[']).unwrap_or(after.len());
            let name = &after[..end];
            if name.is_empty() {
                return None;
            }
            segments.push(Segment::Field(name));
            rest = &after[end..];
        } else if let Some(after) = rest.strip_prefix('[') {
            let close = after.find(']')?;
            let index = after[..close].trim().parse().ok()?;
            segments.push(Segment::Index(index));
            rest = &after[close + 1..];
        } else {
            return None;
        }
    }
    Some((root, segments))
}

fn template_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").expect("valid template regex"))
}

/// Render `{{ expr }}` placeholders. A string that is exactly one placeholder
/// yields the referenced value itself rather than its text.
pub fn render_template(
    template: &str,
    ctx: &ExecutionContext,
    resolver: &dyn ExpressionResolver,
) -> Result<Value> {
    let pattern = template_pattern();

    if let Some(caps) = pattern.captures(template.trim()) {
        if caps.get(0).map(|m| m.as_str().len()) == Some(template.trim().len()) {
            return resolver.resolve(&caps[1], ctx);
        }
    }

    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for caps in pattern.captures_iter(template) {
        let Some(whole) = caps.get(0) else { continue };
        out.push_str(&template[last..whole.start()]);
        out.push_str(&display(&resolver.resolve(&caps[1], ctx)?));
        last = whole.end();
    }
    out.push_str(&template[last..]);
    Ok(Value::String(out))
}

/// Evaluate a node parameter.
///
/// - `{"$ref": "<expr>"}` resolves the expression
/// - strings containing `{{ }}` are rendered as templates
/// - arrays and objects are evaluated element-wise
/// - everything else is a literal
pub fn resolve_param(
    param: &Value,
    ctx: &ExecutionContext,
    resolver: &dyn ExpressionResolver,
) -> Result<Value> {
    match param {
        Value::Object(map) if map.len() == 1 && map.contains_key("$ref") => match &map["$ref"] {
            Value::String(expr) => resolver.resolve(expr, ctx),
            other => Err(FlowError::Validation(format!(
                "$ref must be a string, got {}",
                other
            ))),
        },
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), resolve_param(v, ctx, resolver)?);
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => items
            .iter()
            .map(|v| resolve_param(v, ctx, resolver))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::String(s) if s.contains("{{") => render_template(s, ctx, resolver),
        other => Ok(other.clone()),
    }
}

/// Text form of a value as it appears inside rendered templates.
pub fn display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowrun_core::flow::{FlowDefinition, Node, VariableSpec};
    use flowrun_core::types::{ConversationScope, TriggerEvent};
    use serde_json::json;

    fn ctx() -> ExecutionContext {
        let flow = FlowDefinition::new("f", vec![Node::new("s", "start")], vec![])
            .with_variables(vec![VariableSpec {
                name: "lang".into(),
                default: json!("en"),
            }]);
        let event = TriggerEvent::chat_message(ConversationScope::new("o", "c"), "ping");
        let mut ctx = ExecutionContext::new(&flow, &event);
        ctx.record(
            "fetch",
            json!({ "items": [{ "title": "first" }, { "title": "second" }], "count": 2 }),
        );
        ctx
    }

    #[test]
    fn test_parse_path() {
        let (root, segs) = parse_path("a.b[2].c").unwrap();
        assert_eq!(root, "a");
        assert_eq!(
            segs,
            vec![Segment::Field("b"), Segment::Index(2), Segment::Field("c")]
        );
        assert!(parse_path("").is_none());
        assert!(parse_path("a..b").is_none());
        assert!(parse_path("a[x]").is_none());
    }

    #[test]
    fn test_resolve_node_paths() {
        let ctx = ctx();
        let r = PathResolver;
        assert_eq!(r.resolve("fetch.count", &ctx).unwrap(), json!(2));
        assert_eq!(r.resolve("fetch.items[1].title", &ctx).unwrap(), json!("second"));
        assert_eq!(r.resolve("trigger.message", &ctx).unwrap(), json!("ping"));
        assert_eq!(r.resolve("variables.lang", &ctx).unwrap(), json!("en"));
    }

    #[test]
    fn test_unresolved_reference() {
        let ctx = ctx();
        let r = PathResolver;
        for expr in ["missing.x", "fetch.nope", "fetch.items[9]", "trigger.absent"] {
            assert!(matches!(
                r.resolve(expr, &ctx),
                Err(FlowError::UnresolvedReference(_))
            ));
        }
    }

    #[test]
    fn test_render_template_mixed_text() {
        let ctx = ctx();
        let out = render_template("got {{ fetch.count }} items: {{fetch.items[0].title}}", &ctx, &PathResolver)
            .unwrap();
        assert_eq!(out, json!("got 2 items: first"));
    }

    #[test]
    fn test_render_template_single_placeholder_keeps_type() {
        let ctx = ctx();
        let out = render_template("{{ fetch.items }}", &ctx, &PathResolver).unwrap();
        assert!(out.is_array());
    }

    #[test]
    fn test_resolve_param_nested() {
        let ctx = ctx();
        let param = json!({
            "first": { "$ref": "fetch.items[0].title" },
            "list": ["{{ trigger.message }}", 5],
            "plain": "no placeholders",
        });
        let out = resolve_param(&param, &ctx, &PathResolver).unwrap();
        assert_eq!(
            out,
            json!({ "first": "first", "list": ["ping", 5], "plain": "no placeholders" })
        );
    }
}
