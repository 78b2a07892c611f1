//! ComponentSpec assembly — resolves persisted configuration into the
//! self-contained spec the component runtime consumes.
//!
//! Responsibilities: the cached-topology path, model resolution via the
//! `llm` edge or the `llm_model_config_id` chain, tool discovery over
//! `tool`-labelled edges (with `memory` read as a legacy alias), and
//! output-parser attachment.

use std::sync::Arc;

use components::llm::ModelConfig;
use components::state::WorkflowState;
use components::tool_node::{toolset_for, ToolBinding};
use components::traits::{ComponentConfig, ComponentSpec};
use db::models::{ComponentConfigRow, WorkflowNodeRow, WorkflowRow};
use db::repository::{nodes as nodes_repo, workflows as workflows_repo};
use db::DbPool;

use crate::cache::GraphCache;
use crate::expressions::{resolve_config_expressions, resolve_expressions};
use crate::topology::{build_topology, NodeInfo, Topology};
use crate::EngineError;

/// Edge labels that attach sub-components to a parent node.
const LLM_LABEL: &str = "llm";
const TOOL_LABEL: &str = "tool";
/// Historical label migrated to `tool`; still read for older data.
const LEGACY_MEMORY_LABEL: &str = "memory";
const OUTPUT_PARSER_LABEL: &str = "output_parser";

/// Fetch (or build and cache) the topology for a workflow and trigger.
pub async fn cached_topology(
    pool: &DbPool,
    cache: &GraphCache,
    workflow: &WorkflowRow,
    trigger_node_id: Option<i64>,
) -> Result<Arc<Topology>, EngineError> {
    let nodes = nodes_repo::list_nodes(pool, workflow.id).await?;

    let mut stamps = Vec::with_capacity(nodes.len());
    for node in &nodes {
        let config = nodes_repo::get_component_config(pool, node.component_config_id).await?;
        stamps.push((node.node_id.clone(), node.updated_at, config.updated_at));
    }
    let key = GraphCache::cache_key(workflow, &stamps, trigger_node_id);

    if let Some(topology) = cache.get(&key) {
        return Ok(topology);
    }

    // Build outside the lock; racing builds are idempotent.
    let edges = nodes_repo::list_edges(pool, workflow.id).await?;
    let topology = Arc::new(build_topology(workflow, &nodes, &edges, trigger_node_id)?);
    cache.insert(key, Arc::clone(&topology));
    Ok(topology)
}

fn model_config_from_row(row: &ComponentConfigRow) -> Option<ModelConfig> {
    let model_name = row.model_name.clone()?;
    Some(ModelConfig {
        model_name,
        temperature: row.temperature,
        max_tokens: row.max_tokens,
        top_p: row.top_p,
        frequency_penalty: row.frequency_penalty,
        presence_penalty: row.presence_penalty,
        timeout_seconds: row.timeout_seconds,
        max_retries: row.max_retries,
        response_format: row.response_format.clone(),
        llm_credential_id: row.llm_credential_id,
    })
}

fn domain_config(row: &ComponentConfigRow) -> ComponentConfig {
    ComponentConfig {
        component_type: row.component_type.clone(),
        system_prompt: row.system_prompt.clone(),
        extra: row.extra_config.clone(),
    }
}

/// Resolve the model for a node: `llm` edge first, then the
/// `llm_model_config_id` indirection, then inline tuning fields.
async fn resolve_model(
    pool: &DbPool,
    config: &ComponentConfigRow,
    llm_edge_target: Option<&WorkflowNodeRow>,
) -> Result<Option<ModelConfig>, EngineError> {
    if let Some(target) = llm_edge_target {
        let target_config = nodes_repo::get_component_config(pool, target.component_config_id).await?;
        if target_config.component_type == "ai_model" {
            if let Some(model) = model_config_from_row(&target_config) {
                return Ok(Some(model));
            }
        }
    }

    if let Some(llm_config_id) = config.llm_model_config_id {
        if let Ok(chained) = nodes_repo::get_component_config(pool, llm_config_id).await {
            if chained.component_type == "ai_model" {
                if let Some(model) = model_config_from_row(&chained) {
                    return Ok(Some(model));
                }
            }
        }
    }

    Ok(model_config_from_row(config))
}

/// Assemble the fully-resolved spec for one executable node, applying
/// expression substitution against the current state.
pub async fn build_component_spec(
    pool: &DbPool,
    workflow: &WorkflowRow,
    node: &NodeInfo,
    state: &WorkflowState,
) -> Result<ComponentSpec, EngineError> {
    let config = nodes_repo::get_component_config(pool, node.component_config_id).await?;
    let all_nodes = nodes_repo::list_nodes(pool, workflow.id).await?;
    let all_edges = nodes_repo::list_edges(pool, workflow.id).await?;

    // Lateral edges from this node, grouped by label.
    let mut llm_target: Option<&WorkflowNodeRow> = None;
    let mut tool_targets: Vec<&WorkflowNodeRow> = Vec::new();
    let mut parser_target: Option<&WorkflowNodeRow> = None;
    for edge in all_edges.iter().filter(|e| e.source_node_id == node.node_id) {
        let target = all_nodes.iter().find(|n| n.node_id == edge.target_node_id);
        let Some(target) = target else { continue };
        match edge.edge_label.as_str() {
            LLM_LABEL => llm_target = llm_target.or(Some(target)),
            TOOL_LABEL | LEGACY_MEMORY_LABEL => tool_targets.push(target),
            OUTPUT_PARSER_LABEL => parser_target = parser_target.or(Some(target)),
            _ => {}
        }
    }

    let model = resolve_model(pool, &config, llm_target).await?;

    let mut tools: Vec<ToolBinding> = Vec::new();
    for target in tool_targets {
        let target_config = nodes_repo::get_component_config(pool, target.component_config_id).await?;
        if let Some(bindings) = toolset_for(
            &target.component_type,
            &target_config.extra_config,
            &target.node_id,
        ) {
            tools.extend(bindings);
        }
    }

    let output_parser = match parser_target {
        Some(target) => {
            let target_config =
                nodes_repo::get_component_config(pool, target.component_config_id).await?;
            Some(domain_config(&target_config))
        }
        None => None,
    };

    let subworkflow_slug = match all_nodes
        .iter()
        .find(|n| n.node_id == node.node_id)
        .and_then(|n| n.subworkflow_id)
    {
        Some(subworkflow_id) => Some(workflows_repo::get_workflow(pool, subworkflow_id).await?.slug),
        None => None,
    };

    // Config-time expression substitution against accumulated state.
    let trigger = Some(&state.trigger);
    let system_prompt = resolve_expressions(&config.system_prompt, &state.node_outputs, trigger);
    let extra = resolve_config_expressions(&config.extra_config, &state.node_outputs, trigger);

    Ok(ComponentSpec {
        node_id: node.node_id.clone(),
        component_type: node.component_type.clone(),
        config: ComponentConfig {
            component_type: config.component_type.clone(),
            system_prompt,
            extra,
        },
        model,
        tools,
        output_parser,
        subworkflow_slug,
    })
}
