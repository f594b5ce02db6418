//! Built-in node runners.

pub mod code;
pub mod end;
pub mod if_else;
pub mod loop_node;
pub mod reply;
pub mod start;
pub mod sub_flow;
pub mod variable;
pub mod wait_message;

use serde_json::{json, Map, Value};

use flowrun_core::types::TriggerType;

use crate::context::ExecutionContext;

/// Output of a node that accepts a trigger: the payload fields plus the
/// trigger and scope identifiers.
pub(crate) fn trigger_output(ctx: &ExecutionContext, trigger: TriggerType) -> Value {
    let mut out = match ctx.trigger_payload() {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("payload".to_string(), other.clone());
            map
        }
    };

    let scope = ctx.scope();
    out.insert("trigger_type".into(), json!(trigger));
    out.insert("organization_code".into(), json!(scope.organization_code));
    out.insert("conversation_id".into(), json!(scope.conversation_id));
    if let Some(topic_id) = &scope.topic_id {
        out.insert("topic_id".into(), json!(topic_id));
    }
    let operator = ctx.operator();
    if !operator.uid.is_empty() {
        out.insert(
            "operator".into(),
            json!({ "uid": operator.uid, "nickname": operator.nickname }),
        );
    }
    Value::Object(out)
}
