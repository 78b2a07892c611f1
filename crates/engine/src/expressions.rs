//! Expression substitution for node config fields.
//!
//! String fields in `system_prompt` and `extra_config` are rendered as
//! minijinja templates with each node_id as a top-level variable plus
//! `trigger`. On undefined variable or template error, the original string
//! comes back unchanged — substitution never fails a node.

use std::collections::BTreeMap;

use minijinja::{Environment, UndefinedBehavior};
use serde_json::Value;
use tracing::debug;

/// Render `{{ node_id.port }}` / `{{ trigger.field }}` expressions in one
/// string.
pub fn resolve_expressions(
    template_str: &str,
    node_outputs: &BTreeMap<String, Value>,
    trigger: Option<&Value>,
) -> String {
    if template_str.is_empty() || !template_str.contains("{{") {
        return template_str.to_string();
    }

    let mut context = serde_json::Map::new();
    for (node_id, output) in node_outputs {
        context.insert(node_id.clone(), output.clone());
    }
    if let Some(trigger) = trigger {
        context.insert("trigger".to_string(), trigger.clone());
    }

    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_keep_trailing_newline(true);

    match env.render_str(template_str, Value::Object(context)) {
        Ok(rendered) => rendered,
        Err(err) => {
            debug!("expression resolution failed: {err} — returning original");
            template_str.to_string()
        }
    }
}

/// Recursively resolve expressions in every string value of a config.
pub fn resolve_config_expressions(
    config: &Value,
    node_outputs: &BTreeMap<String, Value>,
    trigger: Option<&Value>,
) -> Value {
    match config {
        Value::String(s) => Value::String(resolve_expressions(s, node_outputs, trigger)),
        Value::Object(obj) => Value::Object(
            obj.iter()
                .map(|(k, v)| {
                    (
                        k.clone(),
                        resolve_config_expressions(v, node_outputs, trigger),
                    )
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| resolve_config_expressions(item, node_outputs, trigger))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn outputs() -> BTreeMap<String, Value> {
        let mut map = BTreeMap::new();
        map.insert("fetch".to_string(), json!({"title": "Report", "count": 3}));
        map
    }

    #[test]
    fn node_output_references_resolve() {
        let rendered = resolve_expressions("Title: {{ fetch.title }}", &outputs(), None);
        assert_eq!(rendered, "Title: Report");
    }

    #[test]
    fn trigger_references_resolve() {
        let trigger = json!({"text": "hello"});
        let rendered = resolve_expressions("Got: {{ trigger.text }}", &outputs(), Some(&trigger));
        assert_eq!(rendered, "Got: hello");
    }

    #[test]
    fn filters_apply() {
        let trigger = json!({"text": "hello"});
        let rendered =
            resolve_expressions("{{ trigger.text | upper }}", &outputs(), Some(&trigger));
        assert_eq!(rendered, "HELLO");
        let rendered =
            resolve_expressions("{{ trigger.missing | default('n/a') }}", &outputs(), Some(&trigger));
        assert_eq!(rendered, "n/a");
    }

    #[test]
    fn undefined_variable_returns_original() {
        let source = "Value: {{ nosuch.port }}";
        assert_eq!(resolve_expressions(source, &outputs(), None), source);
    }

    #[test]
    fn template_syntax_error_returns_original() {
        let source = "Broken {{ fetch.title";
        assert_eq!(resolve_expressions(source, &outputs(), None), source);
    }

    #[test]
    fn plain_strings_pass_through_untouched() {
        assert_eq!(resolve_expressions("no templates", &outputs(), None), "no templates");
    }

    #[test]
    fn config_resolution_recurses_into_objects_and_arrays() {
        let config = json!({
            "prompt": "T: {{ fetch.title }}",
            "nested": {"inner": "{{ fetch.count }}"},
            "list": ["{{ fetch.title }}", 7, {"deep": "{{ fetch.count }}"}],
            "number": 42
        });
        let resolved = resolve_config_expressions(&config, &outputs(), None);
        assert_eq!(resolved["prompt"], "T: Report");
        assert_eq!(resolved["nested"]["inner"], "3");
        assert_eq!(resolved["list"][0], "Report");
        assert_eq!(resolved["list"][1], 7);
        assert_eq!(resolved["list"][2]["deep"], "3");
        assert_eq!(resolved["number"], 42);
    }
}
