//! The `Component` trait and the resolved spec/context types every
//! component receives.
//!
//! Defined here (in the components crate) so both the engine and individual
//! component implementations can import them without a circular dependency.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::checkpoint::{CheckpointStore, InMemoryCheckpointStore};
use crate::error::ComponentError;
use crate::llm::{LlmClient, MockLlm, ModelConfig};
use crate::state::{StateDelta, WorkflowState};
use crate::tool_node::{HostTools, NoHostTools, ToolBinding};

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// A component config after the engine has resolved DB indirections.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentConfig {
    pub component_type: String,
    #[serde(default)]
    pub system_prompt: String,
    /// Type-specific settings (rules, categories, prompt, source_node, …).
    #[serde(default)]
    pub extra: Value,
}

/// Everything a component needs, bound to one node at build time.
///
/// The engine assembles this from persisted rows: the node's own config
/// (with expression substitutions already applied), the model resolved via
/// the `llm` edge or `llm_model_config_id` chain, and the tools discovered
/// via `tool`-labelled edges.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentSpec {
    pub node_id: String,
    pub component_type: String,
    pub config: ComponentConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolBinding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_parser: Option<ComponentConfig>,
    /// Slug of the child workflow for `workflow` (sub-workflow) nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subworkflow_slug: Option<String>,
}

// ---------------------------------------------------------------------------
// Activity observation
// ---------------------------------------------------------------------------

/// Nested tool activity emitted by the agent so observers can render
/// per-tool progress under the parent node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum ToolActivity {
    Started {
        parent_node_id: String,
        tool_name: String,
    },
    Succeeded {
        parent_node_id: String,
        tool_name: String,
        duration_ms: u64,
    },
    Failed {
        parent_node_id: String,
        tool_name: String,
        error: String,
    },
}

/// Fire-and-forget sink for tool activity. The engine adapts this onto the
/// event broadcaster; the default discards.
pub trait ActivitySink: Send + Sync {
    fn tool_activity(&self, activity: ToolActivity);
}

/// Discards everything.
pub struct NullActivitySink;

impl ActivitySink for NullActivitySink {
    fn tool_activity(&self, _activity: ToolActivity) {}
}

// ---------------------------------------------------------------------------
// Execution context
// ---------------------------------------------------------------------------

/// Shared services and identifiers passed to every component at run time.
#[derive(Clone)]
pub struct ComponentContext {
    pub execution_id: String,
    pub workflow_id: i64,
    pub workflow_slug: String,
    pub thread_id: String,
    pub user_id: i64,
    pub llm: Arc<dyn LlmClient>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub host_tools: Arc<dyn HostTools>,
    pub http: reqwest::Client,
    pub activity: Arc<dyn ActivitySink>,
}

impl ComponentContext {
    /// Context wired to mocks, for unit tests.
    pub fn for_tests(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            execution_id: "test-execution".into(),
            workflow_id: 1,
            workflow_slug: "test-workflow".into(),
            thread_id: "1:1".into(),
            user_id: 1,
            llm,
            checkpoints: Arc::new(InMemoryCheckpointStore::new()),
            host_tools: Arc::new(NoHostTools),
            http: reqwest::Client::new(),
            activity: Arc::new(NullActivitySink),
        }
    }

    /// Test context with an LLM that fails if called.
    pub fn for_tests_no_llm() -> Self {
        Self::for_tests(Arc::new(MockLlm::new(Vec::new())))
    }
}

// ---------------------------------------------------------------------------
// The component trait
// ---------------------------------------------------------------------------

/// The core component contract: a pure function from accumulated state to a
/// delta. Components never mutate state directly and never talk to the
/// execution store — the orchestrator owns both.
#[async_trait]
pub trait Component: Send + Sync {
    async fn run(
        &self,
        state: &WorkflowState,
        ctx: &ComponentContext,
    ) -> Result<StateDelta, ComponentError>;
}
