//! Categorizer component — LLM-backed classification into named categories.

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};

use crate::error::ComponentError;
use crate::llm::{ChatRequest, ModelConfig};
use crate::state::{Message, Role, StateDelta, WorkflowState};
use crate::traits::{Component, ComponentContext, ComponentSpec};
use crate::usage::TokenUsage;

#[derive(Debug, Clone)]
struct Category {
    name: String,
    description: String,
}

pub struct Categorizer {
    node_id: String,
    model: ModelConfig,
    system_prompt: String,
    category_names: Vec<String>,
}

impl Categorizer {
    pub fn from_spec(spec: &ComponentSpec) -> Result<Self, ComponentError> {
        let categories: Vec<Category> = spec
            .config
            .extra
            .get("categories")
            .and_then(Value::as_array)
            .map(|raw| {
                raw.iter()
                    .filter_map(|c| {
                        Some(Category {
                            name: c.get("name")?.as_str()?.to_string(),
                            description: c
                                .get("description")
                                .and_then(Value::as_str)
                                .unwrap_or("")
                                .to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let category_descriptions = categories
            .iter()
            .map(|c| format!("- {}: {}", c.name, c.description))
            .collect::<Vec<_>>()
            .join("\n");
        let category_names: Vec<String> = categories.iter().map(|c| c.name.clone()).collect();

        let mut system_prompt = format!(
            "You are a message classifier. Classify the user's message into exactly one category.\n\n\
             Categories:\n{category_descriptions}\n\n\
             Respond with ONLY a JSON object: {{\"category\": \"<name>\"}}\n\
             Valid category names: {category_names:?}"
        );
        if !spec.config.system_prompt.is_empty() {
            system_prompt = format!("{}\n\n{}", spec.config.system_prompt, system_prompt);
        }

        Ok(Self {
            node_id: spec.node_id.clone(),
            model: spec.model.clone().unwrap_or_default(),
            system_prompt,
            category_names,
        })
    }
}

#[async_trait]
impl Component for Categorizer {
    async fn run(
        &self,
        state: &WorkflowState,
        ctx: &ComponentContext,
    ) -> Result<StateDelta, ComponentError> {
        let mut messages = vec![Message::system(&self.system_prompt)];
        match state.messages.iter().rev().find(|m| m.role == Role::Human) {
            Some(last_human) => messages.push(last_human.clone()),
            None => messages.push(Message::human("(no message)")),
        }

        let response = ctx
            .llm
            .chat(ChatRequest {
                model: self.model.clone(),
                messages,
                tools: Vec::new(),
            })
            .await
            .map_err(|e| ComponentError::provider(e.to_string()))?;

        let content = response.message.content.trim().to_string();
        let provider_usage = response.usage.unwrap_or_default();
        let usage = TokenUsage::for_call(
            &self.model.model_name,
            provider_usage.input_tokens,
            provider_usage.output_tokens,
        );

        let category = parse_category(&content, &self.category_names);

        let mut delta = StateDelta {
            route: Some(category.clone()),
            token_usage: Some(usage),
            ..Default::default()
        };
        delta.node_outputs.insert(
            self.node_id.clone(),
            json!({"category": category, "raw": content}),
        );
        Ok(delta)
    }
}

/// Extract the category name from an LLM response: JSON parse, then regex,
/// then substring match, then the first category as a last resort.
fn parse_category(content: &str, valid_names: &[String]) -> String {
    if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(content) {
        if let Some(name) = obj.get("category").and_then(Value::as_str) {
            if valid_names.iter().any(|v| v == name) {
                return name.to_string();
            }
        }
    }

    if let Ok(re) = Regex::new(r#""category"\s*:\s*"([^"]+)""#) {
        if let Some(captures) = re.captures(content) {
            let name = &captures[1];
            if valid_names.iter().any(|v| v == name) {
                return name.to_string();
            }
        }
    }

    let lower = content.to_lowercase();
    for name in valid_names {
        if lower.contains(&name.to_lowercase()) {
            return name.clone();
        }
    }

    valid_names
        .first()
        .cloned()
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlm;
    use crate::traits::ComponentConfig;
    use std::sync::Arc;

    fn spec() -> ComponentSpec {
        ComponentSpec {
            node_id: "cat".into(),
            component_type: "categorizer".into(),
            config: ComponentConfig {
                component_type: "categorizer".into(),
                system_prompt: String::new(),
                extra: json!({"categories": [
                    {"name": "chat", "description": "casual conversation"},
                    {"name": "search", "description": "information lookup"}
                ]}),
            },
            model: Some(ModelConfig::named("gpt-4o-mini")),
            ..Default::default()
        }
    }

    #[test]
    fn parse_ladder() {
        let names = vec!["chat".to_string(), "search".to_string()];
        assert_eq!(parse_category(r#"{"category": "chat"}"#, &names), "chat");
        assert_eq!(
            parse_category(r#"Sure! {"category": "search"} there"#, &names),
            "search"
        );
        assert_eq!(parse_category("I think it's CHAT.", &names), "chat");
        assert_eq!(parse_category("no idea", &names), "chat");
        assert_eq!(parse_category("x", &[]), "unknown");
    }

    #[tokio::test]
    async fn classifies_and_reports_usage() {
        let llm = Arc::new(MockLlm::returning_text(r#"{"category": "chat"}"#, 42, 7));
        let ctx = ComponentContext::for_tests(llm.clone());
        let categorizer = Categorizer::from_spec(&spec()).unwrap();

        let mut state = WorkflowState::initial("e", json!({}));
        state.messages.push(Message::human("hi"));

        let delta = categorizer.run(&state, &ctx).await.unwrap();
        assert_eq!(delta.route.as_deref(), Some("chat"));
        let usage = delta.token_usage.unwrap();
        assert_eq!(usage.input_tokens, 42);
        assert_eq!(usage.output_tokens, 7);
        assert_eq!(usage.llm_calls, 1);
        assert!(usage.cost_usd > 0.0);
        assert_eq!(llm.call_count(), 1);

        // The classifier saw the system prompt plus the last human turn.
        let calls = llm.calls.lock().unwrap();
        assert_eq!(calls[0].messages.len(), 2);
        assert_eq!(calls[0].messages[0].role, Role::System);
    }
}
