//! `components` crate — the component runtime.
//!
//! Every workflow node type is a [`Component`]: a pure function from the
//! accumulated [`WorkflowState`] to a [`StateDelta`]. The engine resolves
//! persisted configs into a [`ComponentSpec`], builds the component through
//! the registry, and owns all state mutation and persistence.

pub mod agent;
pub mod builtin_tools;
pub mod categorizer;
pub mod checkpoint;
pub mod code_execute;
pub mod context;
pub mod control_flow;
pub mod data_ops;
pub mod error;
pub mod http_request;
pub mod human_confirmation;
pub mod llm;
pub mod mock;
pub mod operators;
pub mod output_parser;
pub mod registry;
pub mod router;
pub mod run_command;
pub mod simple_tools;
pub mod state;
pub mod subworkflow;
pub mod switch;
pub mod tool_node;
pub mod traits;
pub mod usage;

pub use error::{ComponentError, ErrorCode};
pub use registry::{build_component, is_sub_component, is_trigger, SUB_COMPONENT_TYPES};
pub use state::{
    deserialize_state, merge_state, serialize_state, InterruptPayload, LoopSignal, Message, Role,
    SpawnTask, StateDelta, ToolCall, WorkflowState,
};
pub use traits::{
    ActivitySink, Component, ComponentConfig, ComponentContext, ComponentSpec, NullActivitySink,
    ToolActivity,
};
pub use usage::TokenUsage;
