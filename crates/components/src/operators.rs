//! Shared rule operators for switch, filter, and other rule-based components.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One routing/filter rule: dotted `field` path into state (or item),
/// an operator name, and a comparison value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Rule {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub field: String,
    #[serde(default = "default_operator")]
    pub operator: String,
    #[serde(default)]
    pub value: Value,
}

fn default_operator() -> String {
    "equals".to_string()
}

/// Resolve a dotted path like `node_outputs.foo.bar` (or `state.…` — the
/// leading `state` segment is stripped) against a JSON value.
pub fn resolve_field<'a>(path: &str, root: &'a Value) -> Option<&'a Value> {
    let mut parts = path.split('.').peekable();
    if parts.peek() == Some(&"state") {
        parts.next();
    }
    let mut current = root;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

fn to_num(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn to_dt(value: Option<&Value>) -> Option<DateTime<Utc>> {
    let s = value?.as_str()?;
    DateTime::parse_from_rfc3339(&s.replace('Z', "+00:00"))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn to_bool(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => matches!(s.to_lowercase().as_str(), "true" | "1" | "yes"),
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Some(Value::Null) | None => false,
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
    }
}

/// Stringified view used by string operators. Bare strings drop quotes.
fn to_str(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

fn is_empty(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(a)) => a.is_empty(),
        Some(Value::Object(o)) => o.is_empty(),
        _ => false,
    }
}

fn length_of(value: Option<&Value>) -> Option<usize> {
    match value? {
        Value::String(s) => Some(s.chars().count()),
        Value::Array(a) => Some(a.len()),
        _ => None,
    }
}

fn contains(field: Option<&Value>, rule: &Value) -> bool {
    match field {
        Some(Value::Array(items)) => items.contains(rule),
        _ => to_str(field).contains(&to_str(Some(rule))),
    }
}

fn matches_regex(field: Option<&Value>, rule: &Value) -> bool {
    let Some(pattern) = rule.as_str() else {
        return false;
    };
    match Regex::new(pattern) {
        Ok(re) => re.is_match(&to_str(field)),
        Err(_) => false,
    }
}

/// Apply `operator` to `(field_value, rule_value)`. Unknown operators never
/// match.
pub fn apply_operator(operator: &str, field: Option<&Value>, rule: &Value) -> bool {
    match operator {
        // Universal
        "exists" => field.is_some() && field != Some(&Value::Null),
        "does_not_exist" => field.is_none() || field == Some(&Value::Null),
        "is_empty" => is_empty(field),
        "is_not_empty" => !is_empty(field),

        // String / equality
        "equals" => to_str(field) == to_str(Some(rule)),
        "not_equals" => to_str(field) != to_str(Some(rule)),
        "contains" => contains(field, rule),
        "not_contains" => !contains(field, rule),
        "starts_with" => to_str(field).starts_with(&to_str(Some(rule))),
        "not_starts_with" => !to_str(field).starts_with(&to_str(Some(rule))),
        "ends_with" => to_str(field).ends_with(&to_str(Some(rule))),
        "not_ends_with" => !to_str(field).ends_with(&to_str(Some(rule))),
        "matches_regex" => matches_regex(field, rule),
        "not_matches_regex" => !matches_regex(field, rule),

        // Number
        "gt" => to_num(field).unwrap_or(0.0) > to_num(Some(rule)).unwrap_or(0.0),
        "lt" => to_num(field).unwrap_or(0.0) < to_num(Some(rule)).unwrap_or(0.0),
        "gte" => to_num(field).unwrap_or(0.0) >= to_num(Some(rule)).unwrap_or(0.0),
        "lte" => to_num(field).unwrap_or(0.0) <= to_num(Some(rule)).unwrap_or(0.0),

        // Datetime — missing operands never match
        "after" => match (to_dt(field), to_dt(Some(rule))) {
            (Some(f), Some(r)) => f > r,
            _ => false,
        },
        "before" => match (to_dt(field), to_dt(Some(rule))) {
            (Some(f), Some(r)) => f < r,
            _ => false,
        },
        "after_or_equal" => match (to_dt(field), to_dt(Some(rule))) {
            (Some(f), Some(r)) => f >= r,
            _ => false,
        },
        "before_or_equal" => match (to_dt(field), to_dt(Some(rule))) {
            (Some(f), Some(r)) => f <= r,
            _ => false,
        },

        // Boolean
        "is_true" => to_bool(field),
        "is_false" => !to_bool(field),

        // Length
        "length_eq" => length_of(field) == to_num(Some(rule)).map(|n| n as usize),
        "length_neq" => length_of(field) != to_num(Some(rule)).map(|n| n as usize),
        "length_gt" => matches!((length_of(field), to_num(Some(rule))), (Some(l), Some(n)) if l > n as usize),
        "length_lt" => matches!((length_of(field), to_num(Some(rule))), (Some(l), Some(n)) if l < n as usize),
        "length_gte" => matches!((length_of(field), to_num(Some(rule))), (Some(l), Some(n)) if l >= n as usize),
        "length_lte" => matches!((length_of(field), to_num(Some(rule))), (Some(l), Some(n)) if l <= n as usize),

        _ => false,
    }
}

/// Evaluate a rule against a JSON root (state or list item).
pub fn rule_matches(rule: &Rule, root: &Value) -> bool {
    let field = resolve_field(&rule.field, root);
    apply_operator(&rule.operator, field, &rule.value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state() -> Value {
        json!({
            "route": "chat",
            "node_outputs": {
                "cat": {"category": "search", "score": 0.9},
                "list": {"items": [1, 2, 3]}
            },
            "trigger": {"text": "/start hello", "ts": "2025-06-01T12:00:00Z"},
            "flags": {"enabled": "yes"}
        })
    }

    #[test]
    fn dotted_path_resolution_strips_state_prefix() {
        let s = state();
        assert_eq!(
            resolve_field("state.node_outputs.cat.category", &s),
            Some(&json!("search"))
        );
        assert_eq!(resolve_field("route", &s), Some(&json!("chat")));
        assert_eq!(resolve_field("missing.path", &s), None);
    }

    #[test]
    fn string_operators() {
        let s = state();
        let field = resolve_field("trigger.text", &s);
        assert!(apply_operator("starts_with", field, &json!("/start")));
        assert!(apply_operator("contains", field, &json!("hello")));
        assert!(apply_operator("matches_regex", field, &json!("^/st\\w+")));
        assert!(apply_operator("not_ends_with", field, &json!("bye")));
    }

    #[test]
    fn numeric_and_length_operators() {
        let s = state();
        let score = resolve_field("node_outputs.cat.score", &s);
        assert!(apply_operator("gt", score, &json!(0.5)));
        assert!(apply_operator("lte", score, &json!("0.9")));

        let items = resolve_field("node_outputs.list.items", &s);
        assert!(apply_operator("length_eq", items, &json!(3)));
        assert!(apply_operator("length_gt", items, &json!(2)));
    }

    #[test]
    fn datetime_operators() {
        let s = state();
        let ts = resolve_field("trigger.ts", &s);
        assert!(apply_operator("after", ts, &json!("2025-01-01T00:00:00Z")));
        assert!(apply_operator("before", ts, &json!("2026-01-01T00:00:00Z")));
        // Unparseable operand never matches.
        assert!(!apply_operator("after", ts, &json!("not-a-date")));
    }

    #[test]
    fn boolean_and_emptiness() {
        let s = state();
        assert!(apply_operator("is_true", resolve_field("flags.enabled", &s), &Value::Null));
        assert!(apply_operator("is_empty", None, &Value::Null));
        assert!(apply_operator("is_not_empty", resolve_field("route", &s), &Value::Null));
        assert!(apply_operator("does_not_exist", resolve_field("nope", &s), &Value::Null));
    }

    #[test]
    fn unknown_operator_never_matches() {
        assert!(!apply_operator("frobnicate", Some(&json!(1)), &json!(1)));
    }
}
