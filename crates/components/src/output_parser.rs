//! Output parser — extracts structured data from the newest AI message.
//!
//! As a sub-component it is attached to an agent via an `output_parser`
//! edge; standalone it parses `state.output` or the last AI message.

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};

use crate::error::ComponentError;
use crate::state::{Role, StateDelta, WorkflowState};
use crate::traits::{Component, ComponentContext, ComponentSpec};

pub struct OutputParser {
    node_id: String,
    format: String,
    pattern: Option<String>,
}

impl OutputParser {
    pub fn from_spec(spec: &ComponentSpec) -> Self {
        let extra = &spec.config.extra;
        Self {
            node_id: spec.node_id.clone(),
            format: extra
                .get("format")
                .and_then(Value::as_str)
                .unwrap_or("json")
                .to_string(),
            pattern: extra
                .get("pattern")
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }
}

/// Parse `text` per the configured format. Shared with the agent when an
/// output_parser sub-component is attached.
pub fn parse_output(text: &str, format: &str, pattern: Option<&str>) -> Value {
    match format {
        "json" => extract_json(text).unwrap_or_else(|| json!({"raw": text})),
        "regex" => {
            let Some(pattern) = pattern else {
                return json!({"raw": text});
            };
            match Regex::new(pattern) {
                Ok(re) => match re.captures(text) {
                    Some(captures) => {
                        let groups: Vec<&str> =
                            captures.iter().flatten().map(|m| m.as_str()).collect();
                        json!({"matches": groups})
                    }
                    None => json!({"matches": []}),
                },
                Err(_) => json!({"raw": text}),
            }
        }
        "lines" => {
            let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
            json!({"lines": lines})
        }
        _ => json!({"raw": text}),
    }
}

/// Find the first JSON object or array embedded in free text.
fn extract_json(text: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str(text.trim()) {
        return Some(value);
    }
    for (open, close) in [('{', '}'), ('[', ']')] {
        let Some(start) = text.find(open) else {
            continue;
        };
        // Try successively shorter spans ending at a matching close.
        let mut end = text.rfind(close);
        while let Some(e) = end {
            if e <= start {
                break;
            }
            if let Ok(value) = serde_json::from_str(&text[start..=e]) {
                return Some(value);
            }
            end = text[..e].rfind(close);
        }
    }
    None
}

#[async_trait]
impl Component for OutputParser {
    async fn run(
        &self,
        state: &WorkflowState,
        _ctx: &ComponentContext,
    ) -> Result<StateDelta, ComponentError> {
        let text = if let Value::String(output) = &state.output {
            output.clone()
        } else if state.output != Value::Null {
            state.output.to_string()
        } else {
            state
                .messages
                .iter()
                .rev()
                .find(|m| m.role == Role::Ai)
                .map(|m| m.content.clone())
                .unwrap_or_default()
        };

        let parsed = parse_output(&text, &self.format, self.pattern.as_deref());
        Ok(StateDelta::with_node_output(
            &self.node_id,
            json!({"parsed": parsed}),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_is_extracted_from_prose() {
        let parsed = parse_output("Here you go: {\"a\": 1} enjoy", "json", None);
        assert_eq!(parsed, json!({"a": 1}));
    }

    #[test]
    fn plain_json_parses_directly() {
        assert_eq!(parse_output("[1, 2]", "json", None), json!([1, 2]));
    }

    #[test]
    fn unparseable_text_falls_back_to_raw() {
        assert_eq!(
            parse_output("no json here", "json", None),
            json!({"raw": "no json here"})
        );
    }

    #[test]
    fn regex_format_captures_groups() {
        let parsed = parse_output("order #1234 confirmed", "regex", Some(r"#(\d+)"));
        assert_eq!(parsed, json!({"matches": ["#1234", "1234"]}));
    }
}
