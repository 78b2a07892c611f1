//! The LLM provider seam.
//!
//! The core never speaks a vendor wire format; it goes through [`LlmClient`].
//! Provider adapters live outside this workspace and are injected at
//! startup. [`MockLlm`] is the in-tree test double.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::Message;
use crate::tool_node::ToolDef;

/// Model-tuning parameters resolved from an `ai_model` component config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_credential_id: Option<i64>,
}

impl ModelConfig {
    pub fn named(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            ..Default::default()
        }
    }
}

/// Raw provider usage counters; zero when the provider omits them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderUsage {
    pub input_tokens: i64,
    pub output_tokens: i64,
}

/// One chat completion request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: ModelConfig,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDef>,
}

/// One chat completion response: the assistant message (which may request
/// tool calls) plus usage metadata if the provider reported it.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub message: Message,
    pub usage: Option<ProviderUsage>,
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("provider error: {0}")]
    Provider(String),

    #[error("provider request timed out after {0}s")]
    Timeout(u64),
}

/// The provider contract. Implementations must be safe to share across
/// worker tasks.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError>;
}

// ---------------------------------------------------------------------------
// MockLlm — a programmable test double
// ---------------------------------------------------------------------------

/// Scripted LLM for tests: pops one canned response per call and records
/// every request it receives.
pub struct MockLlm {
    responses: Mutex<VecDeque<ChatResponse>>,
    /// All requests seen, in call order.
    pub calls: Arc<Mutex<Vec<ChatRequest>>>,
}

impl MockLlm {
    pub fn new(responses: Vec<ChatResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Mock that always answers with plain text and fixed usage.
    pub fn returning_text(text: &str, input_tokens: i64, output_tokens: i64) -> Self {
        Self::new(vec![ChatResponse {
            message: Message::ai(text),
            usage: Some(ProviderUsage {
                input_tokens,
                output_tokens,
            }),
        }])
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        self.calls.lock().unwrap().push(request);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| LlmError::Provider("mock exhausted".into()))
    }
}
