use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Comparison operator used by branching nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "contains")]
    Contains,
    #[serde(rename = "not_contains")]
    NotContains,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "empty")]
    Empty,
    #[serde(rename = "not_empty")]
    NotEmpty,
}

/// How the conditions of one branch combine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Logic {
    #[default]
    And,
    Or,
}

/// Compare two already-resolved values.
///
/// Numbers (or numeric strings) compare numerically; everything else
/// compares by equality or substring. Ordering on non-numbers is false.
pub fn compare(left: &Value, op: CompareOp, right: &Value) -> bool {
    match op {
        CompareOp::Eq => loosely_equal(left, right),
        CompareOp::Ne => !loosely_equal(left, right),
        CompareOp::Contains => contains(left, right),
        CompareOp::NotContains => !contains(left, right),
        CompareOp::Gt => ordered(left, right).is_some_and(|o| o.is_gt()),
        CompareOp::Ge => ordered(left, right).is_some_and(|o| o.is_ge()),
        CompareOp::Lt => ordered(left, right).is_some_and(|o| o.is_lt()),
        CompareOp::Le => ordered(left, right).is_some_and(|o| o.is_le()),
        CompareOp::Empty => is_empty(left),
        CompareOp::NotEmpty => !is_empty(left),
    }
}

/// Combine condition results.
pub fn combine(logic: Logic, results: impl IntoIterator<Item = bool>) -> bool {
    let mut results = results.into_iter().peekable();
    if results.peek().is_none() {
        return false;
    }
    match logic {
        Logic::And => results.all(|r| r),
        Logic::Or => results.any(|r| r),
    }
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn loosely_equal(left: &Value, right: &Value) -> bool {
    if left == right {
        return true;
    }
    match (as_number(left), as_number(right)) {
        (Some(l), Some(r)) => l == r,
        _ => match (left, right) {
            (Value::String(l), other) | (other, Value::String(l)) if !other.is_string() => {
                *l == other.to_string()
            }
            _ => false,
        },
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::String(s) => match needle {
            Value::String(n) => s.contains(n.as_str()),
            other => s.contains(&other.to_string()),
        },
        Value::Array(items) => items.iter().any(|i| loosely_equal(i, needle)),
        Value::Object(map) => needle.as_str().is_some_and(|k| map.contains_key(k)),
        _ => false,
    }
}

fn ordered(left: &Value, right: &Value) -> Option<std::cmp::Ordering> {
    as_number(left)?.partial_cmp(&as_number(right)?)
}

fn is_empty(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}
