//! Row-building helpers shared by the engine's unit tests.

#![allow(dead_code)]

use chrono::Utc;
use db::models::{ComponentConfigRow, WorkflowEdgeRow, WorkflowNodeRow, WorkflowRow};
use serde_json::json;

pub fn workflow_row(id: i64, slug: &str) -> WorkflowRow {
    WorkflowRow {
        id,
        slug: slug.to_string(),
        name: slug.to_string(),
        description: String::new(),
        owner_id: 1,
        is_active: true,
        is_default: false,
        tags: json!([]),
        max_execution_seconds: 600,
        input_schema: None,
        output_schema: None,
        error_handler_workflow_id: None,
        deleted_at: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

pub fn node_row(
    id: i64,
    workflow_id: i64,
    node_id: &str,
    component_type: &str,
    is_entry_point: bool,
) -> WorkflowNodeRow {
    WorkflowNodeRow {
        id,
        workflow_id,
        node_id: node_id.to_string(),
        component_type: component_type.to_string(),
        component_config_id: id,
        is_entry_point,
        interrupt_before: false,
        interrupt_after: false,
        subworkflow_id: None,
        code_block_id: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

pub fn edge_row(id: i64, workflow_id: i64, source: &str, target: &str) -> WorkflowEdgeRow {
    labelled_edge_row(id, workflow_id, source, target, "")
}

pub fn labelled_edge_row(
    id: i64,
    workflow_id: i64,
    source: &str,
    target: &str,
    label: &str,
) -> WorkflowEdgeRow {
    WorkflowEdgeRow {
        id,
        workflow_id,
        source_node_id: source.to_string(),
        target_node_id: target.to_string(),
        edge_type: "direct".to_string(),
        edge_label: label.to_string(),
        condition_value: String::new(),
        condition_mapping: None,
        priority: 0,
    }
}

pub fn conditional_edge_row(
    id: i64,
    workflow_id: i64,
    source: &str,
    target: &str,
    condition_value: &str,
) -> WorkflowEdgeRow {
    WorkflowEdgeRow {
        id,
        workflow_id,
        source_node_id: source.to_string(),
        target_node_id: target.to_string(),
        edge_type: "conditional".to_string(),
        edge_label: String::new(),
        condition_value: condition_value.to_string(),
        condition_mapping: None,
        priority: 0,
    }
}

pub fn config_row(id: i64, component_type: &str) -> ComponentConfigRow {
    ComponentConfigRow {
        id,
        component_type: component_type.to_string(),
        system_prompt: String::new(),
        extra_config: json!({}),
        model_name: None,
        temperature: None,
        max_tokens: None,
        top_p: None,
        frequency_penalty: None,
        presence_penalty: None,
        timeout_seconds: None,
        max_retries: None,
        response_format: None,
        llm_credential_id: None,
        llm_model_config_id: None,
        credential_id: None,
        is_active: None,
        priority: None,
        trigger_config: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}
