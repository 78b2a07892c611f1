//! Data operation components — merge and filter.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::error::ComponentError;
use crate::operators::{apply_operator, Rule};
use crate::state::{StateDelta, WorkflowState};
use crate::traits::{Component, ComponentContext, ComponentSpec};

// ---------------------------------------------------------------------------
// merge
// ---------------------------------------------------------------------------

/// Merge outputs from multiple source nodes.
/// Modes: `append` (flat array) or `combine` (merged object).
pub struct Merge {
    node_id: String,
    mode: String,
    source_nodes: Vec<String>,
}

impl Merge {
    pub fn from_spec(spec: &ComponentSpec) -> Self {
        let extra = &spec.config.extra;
        Self {
            node_id: spec.node_id.clone(),
            mode: extra
                .get("mode")
                .and_then(Value::as_str)
                .unwrap_or("append")
                .to_string(),
            source_nodes: extra
                .get("source_nodes")
                .and_then(Value::as_array)
                .map(|a| {
                    a.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl Component for Merge {
    async fn run(
        &self,
        state: &WorkflowState,
        _ctx: &ComponentContext,
    ) -> Result<StateDelta, ComponentError> {
        let sources: Vec<&Value> = if self.source_nodes.is_empty() {
            state.node_outputs.values().collect()
        } else {
            self.source_nodes
                .iter()
                .filter_map(|name| state.node_outputs.get(name))
                .collect()
        };

        let merged = if self.mode == "combine" {
            let mut result = Map::new();
            for (idx, source) in sources.iter().enumerate() {
                match source {
                    Value::Object(obj) => result.extend(obj.clone()),
                    other => {
                        result.insert(format!("value_{idx}"), (*other).clone());
                    }
                }
            }
            Value::Object(result)
        } else {
            // "append" (default, also covers legacy "concat")
            let mut result = Vec::new();
            for source in sources {
                match source {
                    Value::Array(items) => result.extend(items.clone()),
                    other => result.push(other.clone()),
                }
            }
            Value::Array(result)
        };

        Ok(StateDelta::with_node_output(
            &self.node_id,
            json!({"merged": merged}),
        ))
    }
}

// ---------------------------------------------------------------------------
// filter
// ---------------------------------------------------------------------------

/// Filter items from a source node output using rule-based matching.
/// An item passes when every rule matches.
pub struct Filter {
    node_id: String,
    rules: Vec<Rule>,
    source_node: Option<String>,
    items_field: String,
}

impl Filter {
    pub fn from_spec(spec: &ComponentSpec) -> Result<Self, ComponentError> {
        let extra = &spec.config.extra;
        let rules = match extra.get("rules") {
            Some(raw) => serde_json::from_value(raw.clone()).map_err(|e| {
                ComponentError::fatal(
                    crate::error::ErrorCode::Validation,
                    format!("invalid filter rules: {e}"),
                )
            })?,
            None => Vec::new(),
        };
        Ok(Self {
            node_id: spec.node_id.clone(),
            rules,
            source_node: extra
                .get("source_node")
                .and_then(Value::as_str)
                .map(str::to_string),
            items_field: extra
                .get("field")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string(),
        })
    }

    fn item_matches(&self, item: &Value) -> bool {
        self.rules.iter().all(|rule| {
            let field_val = match item {
                Value::Object(obj) => obj.get(&rule.field),
                _ => Some(item),
            };
            apply_operator(&rule.operator, field_val, &rule.value)
        })
    }
}

#[async_trait]
impl Component for Filter {
    async fn run(
        &self,
        state: &WorkflowState,
        _ctx: &ComponentContext,
    ) -> Result<StateDelta, ComponentError> {
        let mut data = match &self.source_node {
            Some(source) => state.node_outputs.get(source).cloned(),
            None => Some(state.output.clone()),
        };
        if !self.items_field.is_empty() {
            data = match data {
                Some(Value::Object(obj)) => obj.get(&self.items_field).cloned(),
                other => other,
            };
        }

        let filtered = match data {
            Some(Value::Array(items)) => {
                if self.rules.is_empty() {
                    Value::Array(items)
                } else {
                    Value::Array(
                        items
                            .into_iter()
                            .filter(|item| self.item_matches(item))
                            .collect(),
                    )
                }
            }
            Some(Value::Null) | None => json!([]),
            Some(other) => other,
        };

        Ok(StateDelta::with_node_output(
            &self.node_id,
            json!({"filtered": filtered}),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::ComponentConfig;

    fn spec(component_type: &str, extra: Value) -> ComponentSpec {
        ComponentSpec {
            node_id: "op".into(),
            component_type: component_type.into(),
            config: ComponentConfig {
                component_type: component_type.into(),
                system_prompt: String::new(),
                extra,
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn merge_append_flattens_arrays() {
        let merge = Merge::from_spec(&spec(
            "merge",
            json!({"mode": "append", "source_nodes": ["a", "b"]}),
        ));
        let mut state = WorkflowState::initial("e", json!({}));
        state.node_outputs.insert("a".into(), json!([1, 2]));
        state.node_outputs.insert("b".into(), json!("three"));

        let delta = merge
            .run(&state, &ComponentContext::for_tests_no_llm())
            .await
            .unwrap();
        assert_eq!(
            delta.node_outputs["op"]["merged"],
            json!([1, 2, "three"])
        );
    }

    #[tokio::test]
    async fn merge_combine_merges_objects() {
        let merge = Merge::from_spec(&spec(
            "merge",
            json!({"mode": "combine", "source_nodes": ["a", "b"]}),
        ));
        let mut state = WorkflowState::initial("e", json!({}));
        state.node_outputs.insert("a".into(), json!({"x": 1}));
        state.node_outputs.insert("b".into(), json!({"y": 2}));

        let delta = merge
            .run(&state, &ComponentContext::for_tests_no_llm())
            .await
            .unwrap();
        assert_eq!(delta.node_outputs["op"]["merged"], json!({"x": 1, "y": 2}));
    }

    #[tokio::test]
    async fn filter_applies_all_rules() {
        let filter = Filter::from_spec(&spec(
            "filter",
            json!({
                "source_node": "list",
                "field": "items",
                "rules": [
                    {"field": "score", "operator": "gt", "value": 5},
                    {"field": "kind", "operator": "equals", "value": "a"}
                ]
            }),
        ))
        .unwrap();

        let mut state = WorkflowState::initial("e", json!({}));
        state.node_outputs.insert(
            "list".into(),
            json!({"items": [
                {"score": 9, "kind": "a"},
                {"score": 9, "kind": "b"},
                {"score": 1, "kind": "a"}
            ]}),
        );

        let delta = filter
            .run(&state, &ComponentContext::for_tests_no_llm())
            .await
            .unwrap();
        assert_eq!(
            delta.node_outputs["op"]["filtered"],
            json!([{"score": 9, "kind": "a"}])
        );
    }

    #[tokio::test]
    async fn filter_without_rules_passes_everything() {
        let filter = Filter::from_spec(&spec("filter", json!({"source_node": "list"}))).unwrap();
        let mut state = WorkflowState::initial("e", json!({}));
        state.node_outputs.insert("list".into(), json!([1, 2]));

        let delta = filter
            .run(&state, &ComponentContext::for_tests_no_llm())
            .await
            .unwrap();
        assert_eq!(delta.node_outputs["op"]["filtered"], json!([1, 2]));
    }
}
