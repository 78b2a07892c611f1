//! Component registry — maps `component_type` strings to factories.
//!
//! Sub-component types (ai_model, tool bundles) are not constructible here;
//! they are consumed laterally by their parent via labelled edges and never
//! appear in the execution DAG.

use std::collections::HashSet;

use crate::agent::Agent;
use crate::categorizer::Categorizer;
use crate::code_execute::CodeExecute;
use crate::control_flow::{Loop, Wait};
use crate::data_ops::{Filter, Merge};
use crate::error::{ComponentError, ErrorCode};
use crate::http_request::HttpRequest;
use crate::human_confirmation::HumanConfirmation;
use crate::output_parser::OutputParser;
use crate::router::Router;
use crate::run_command::RunCommand;
use crate::simple_tools::{Calculator, DatetimeNow, WebSearch};
use crate::subworkflow::Subworkflow;
use crate::switch::Switch;
use crate::traits::{Component, ComponentSpec};

/// Node types excluded from the execution DAG: they serve other nodes and
/// are discovered through `llm`/`tool`/`output_parser` edges.
pub const SUB_COMPONENT_TYPES: &[&str] = &[
    "ai_model",
    "run_command",
    "output_parser",
    "memory_read",
    "memory_write",
    "code_execute",
    "create_agent_user",
    "platform_api",
    "whoami",
    "epic_tools",
    "task_tools",
    "spawn_and_await",
    "workflow_create",
    "workflow_discover",
    "scheduler_tools",
    "system_health",
    "get_totp_code",
    "skill",
];

/// True when `component_type` is a sub-component (never a DAG node).
pub fn is_sub_component(component_type: &str) -> bool {
    SUB_COMPONENT_TYPES.contains(&component_type)
}

/// True for `trigger_*` node types.
pub fn is_trigger(component_type: &str) -> bool {
    component_type.starts_with("trigger_")
}

/// Build the component instance for a resolved spec.
///
/// Unknown executable types and sub-component types are validation errors —
/// the topology builder should have excluded the latter.
pub fn build_component(spec: &ComponentSpec) -> Result<Box<dyn Component>, ComponentError> {
    if is_sub_component(&spec.component_type) || is_trigger(&spec.component_type) {
        return Err(ComponentError::fatal(
            ErrorCode::Validation,
            format!(
                "component type '{}' is not executable (node '{}')",
                spec.component_type, spec.node_id
            ),
        ));
    }

    let component: Box<dyn Component> = match spec.component_type.as_str() {
        "agent" => Box::new(Agent::from_spec(spec)?),
        "router" => Box::new(Router::from_spec(spec)),
        "switch" => Box::new(Switch::from_spec(spec)?),
        "categorizer" => Box::new(Categorizer::from_spec(spec)?),
        "loop" => Box::new(Loop::from_spec(spec)),
        "wait" => Box::new(Wait::from_spec(spec)),
        "merge" => Box::new(Merge::from_spec(spec)),
        "filter" => Box::new(Filter::from_spec(spec)?),
        "human_confirmation" => Box::new(HumanConfirmation::from_spec(spec)),
        "code" => Box::new(CodeExecute::from_spec(spec)),
        "http_request" => Box::new(HttpRequest::from_spec(spec)),
        "web_search" => Box::new(WebSearch::from_spec(spec)),
        "calculator" => Box::new(Calculator::from_spec(spec)),
        "datetime" => Box::new(DatetimeNow::from_spec(spec)),
        "workflow" => Box::new(Subworkflow::from_spec(spec)),
        other => {
            // Standalone output_parser nodes are legal even though the type
            // usually rides on an edge.
            if other == "output_parser" {
                Box::new(OutputParser::from_spec(spec))
            } else {
                return Err(ComponentError::fatal(
                    ErrorCode::Validation,
                    format!("unknown component type '{other}' (node '{}')", spec.node_id),
                ));
            }
        }
    };
    Ok(component)
}

/// The executable component types this registry can construct.
pub fn executable_types() -> HashSet<&'static str> {
    [
        "agent",
        "router",
        "switch",
        "categorizer",
        "loop",
        "wait",
        "merge",
        "filter",
        "human_confirmation",
        "code",
        "http_request",
        "web_search",
        "calculator",
        "datetime",
        "workflow",
    ]
    .into_iter()
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::ComponentConfig;

    fn spec(component_type: &str) -> ComponentSpec {
        ComponentSpec {
            node_id: "n".into(),
            component_type: component_type.into(),
            config: ComponentConfig {
                component_type: component_type.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn executable_types_build() {
        for component_type in ["router", "switch", "loop", "merge", "filter", "human_confirmation", "code", "wait"] {
            assert!(
                build_component(&spec(component_type)).is_ok(),
                "{component_type} should build"
            );
        }
    }

    #[test]
    fn sub_components_and_triggers_are_rejected() {
        assert!(build_component(&spec("ai_model")).is_err());
        assert!(build_component(&spec("spawn_and_await")).is_err());
        assert!(build_component(&spec("trigger_telegram")).is_err());
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(build_component(&spec("quantum_entangler")).is_err());
    }

    #[test]
    fn sub_component_classification() {
        assert!(is_sub_component("ai_model"));
        assert!(is_sub_component("scheduler_tools"));
        assert!(!is_sub_component("agent"));
        assert!(is_trigger("trigger_webhook"));
        assert!(!is_trigger("agent"));
    }
}
