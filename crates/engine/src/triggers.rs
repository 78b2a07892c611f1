//! Trigger resolver — matches external events to workflow trigger nodes
//! and dispatches executions.

use components::checkpoint::derive_thread_id;
use db::models::{ComponentConfigRow, WorkflowNodeRow, WorkflowRow};
use db::repository::{executions as exec_repo, nodes as nodes_repo, workflows as workflows_repo};
use db::DbPool;
use queue::{Job, JobQueue};
use regex::RegexBuilder;
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::EngineError;

/// Static event-type → trigger component-type table.
pub fn component_type_for_event(event_type: &str) -> Option<&'static str> {
    match event_type {
        "telegram_message" | "telegram_chat" => Some("trigger_telegram"),
        "webhook" => Some("trigger_webhook"),
        "schedule" => Some("trigger_schedule"),
        "manual" => Some("trigger_manual"),
        "workflow" => Some("trigger_workflow"),
        "error" => Some("trigger_error"),
        _ => None,
    }
}

/// Resolve an event to `(workflow, trigger node)`.
///
/// Candidates are active-workflow trigger nodes of the mapped component
/// type, ordered by `(priority DESC, id ASC)`, filtered per type. On no
/// match, falls back to the default workflow if one is configured.
pub async fn resolve(
    pool: &DbPool,
    event_type: &str,
    event_data: &Value,
) -> Result<Option<(WorkflowRow, WorkflowNodeRow)>, EngineError> {
    let Some(component_type) = component_type_for_event(event_type) else {
        return Ok(None);
    };

    let trigger_nodes = nodes_repo::list_trigger_nodes(pool, component_type).await?;

    let mut candidates: Vec<(i32, WorkflowNodeRow, ComponentConfigRow)> = Vec::new();
    for node in trigger_nodes {
        let config = nodes_repo::get_component_config(pool, node.component_config_id).await?;
        if !config.component_type.starts_with("trigger_") {
            continue;
        }
        if config.is_active == Some(false) {
            continue;
        }
        candidates.push((config.priority.unwrap_or(0), node, config));
    }
    candidates.sort_by_key(|(priority, node, _)| (-priority, node.id));

    for (_, node, config) in &candidates {
        if matches(config, event_type, event_data) {
            let workflow = workflows_repo::get_workflow(pool, node.workflow_id).await?;
            return Ok(Some((workflow, node.clone())));
        }
    }

    // Fall back to the default workflow.
    if let Some(default_workflow) = workflows_repo::get_default_workflow(pool).await? {
        if let Some(default_trigger) = nodes_repo::get_trigger_node_for_workflow(
            pool,
            default_workflow.id,
            component_type,
        )
        .await?
        {
            debug!(event_type, "falling back to default workflow");
            return Ok(Some((default_workflow, default_trigger)));
        }
    }

    Ok(None)
}

fn matches(config: &ComponentConfigRow, event_type: &str, event_data: &Value) -> bool {
    let empty = Value::Object(Default::default());
    let trigger_config = config.trigger_config.as_ref().unwrap_or(&empty);

    match event_type {
        "telegram_message" | "telegram_chat" => match_telegram(trigger_config, event_data),
        "webhook" => match_webhook(trigger_config, event_data),
        "workflow" => {
            match trigger_config.get("source_workflow").and_then(Value::as_str) {
                Some(source) => {
                    event_data.get("source_workflow").and_then(Value::as_str) == Some(source)
                }
                None => true,
            }
        }
        // manual / error / schedule match unconditionally.
        _ => true,
    }
}

fn match_telegram(config: &Value, event_data: &Value) -> bool {
    if let Some(allowed) = config.get("allowed_user_ids").and_then(Value::as_array) {
        if !allowed.is_empty() {
            let user_id = event_data.get("user_id").and_then(Value::as_i64);
            if let Some(user_id) = user_id {
                if !allowed.iter().filter_map(Value::as_i64).any(|id| id == user_id) {
                    return false;
                }
            }
        }
    }

    let text = event_data.get("text").and_then(Value::as_str).unwrap_or("");
    if let Some(pattern) = config.get("pattern").and_then(Value::as_str) {
        let matched = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map(|re| re.is_match(text))
            .unwrap_or(false);
        if !matched {
            return false;
        }
    }
    if let Some(command) = config.get("command").and_then(Value::as_str) {
        if !text.starts_with(&format!("/{command}")) {
            return false;
        }
    }
    true
}

fn match_webhook(config: &Value, event_data: &Value) -> bool {
    match config.get("path").and_then(Value::as_str) {
        Some(expected) => event_data.get("path").and_then(Value::as_str) == Some(expected),
        None => true,
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Resolve an event and, on a hit, create a pending execution and enqueue
/// its start job. Returns the new execution id, or `None` when no trigger
/// matched (a non-error).
pub async fn dispatch_event(
    pool: &DbPool,
    queue: &JobQueue,
    event_type: &str,
    event_data: Value,
) -> Result<Option<Uuid>, EngineError> {
    let Some((workflow, trigger_node)) = resolve(pool, event_type, &event_data).await? else {
        debug!(event_type, "no trigger matched");
        return Ok(None);
    };

    let user_profile_id = event_data
        .get("user_profile_id")
        .and_then(Value::as_i64)
        .unwrap_or(workflow.owner_id);
    let chat_id = event_data.get("chat_id").and_then(Value::as_i64);

    let execution_id = Uuid::new_v4();
    exec_repo::create_execution(
        pool,
        &exec_repo::NewExecution {
            execution_id,
            workflow_id: workflow.id,
            trigger_node_id: Some(trigger_node.id),
            parent_execution_id: None,
            parent_node_id: String::new(),
            user_profile_id,
            thread_id: derive_thread_id(user_profile_id, chat_id, workflow.id),
            trigger_payload: Some(event_data),
            max_retries: 3,
        },
    )
    .await?;

    queue
        .enqueue(Job::ExecuteWorkflowJob { execution_id })
        .await?;
    info!(
        event_type,
        workflow = %workflow.slug,
        execution = %execution_id,
        "event dispatched"
    );
    Ok(Some(execution_id))
}

/// Dispatch directly to a known workflow (error handlers, scheduler fires
/// for a specific job). Uses the workflow's trigger node of the given type
/// when present.
pub async fn dispatch_to_workflow(
    pool: &DbPool,
    queue: &JobQueue,
    workflow_id: i64,
    trigger_component_type: &str,
    payload: Value,
    user_profile_id: i64,
) -> Result<Uuid, EngineError> {
    let workflow = workflows_repo::get_workflow(pool, workflow_id).await?;
    let trigger_node =
        nodes_repo::get_trigger_node_for_workflow(pool, workflow_id, trigger_component_type)
            .await?;

    // Callers without a user context (manual API fire, error handlers) run
    // as the workflow owner.
    let user_profile_id = if user_profile_id > 0 {
        user_profile_id
    } else {
        workflow.owner_id
    };
    let chat_id = payload.get("chat_id").and_then(Value::as_i64);
    let execution_id = Uuid::new_v4();
    exec_repo::create_execution(
        pool,
        &exec_repo::NewExecution {
            execution_id,
            workflow_id: workflow.id,
            trigger_node_id: trigger_node.map(|n| n.id),
            parent_execution_id: None,
            parent_node_id: String::new(),
            user_profile_id,
            thread_id: derive_thread_id(user_profile_id, chat_id, workflow.id),
            trigger_payload: Some(payload),
            max_retries: 3,
        },
    )
    .await?;

    queue
        .enqueue(Job::ExecuteWorkflowJob { execution_id })
        .await?;
    Ok(execution_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::config_row;
    use serde_json::json;

    fn trigger_config(component_type: &str, trigger: Value) -> ComponentConfigRow {
        let mut config = config_row(1, component_type);
        config.trigger_config = Some(trigger);
        config
    }

    #[test]
    fn event_table_covers_known_types() {
        assert_eq!(component_type_for_event("webhook"), Some("trigger_webhook"));
        assert_eq!(component_type_for_event("manual"), Some("trigger_manual"));
        assert_eq!(
            component_type_for_event("telegram_message"),
            Some("trigger_telegram")
        );
        assert_eq!(component_type_for_event("nonsense"), None);
    }

    #[test]
    fn telegram_whitelist_filters() {
        let config = trigger_config(
            "trigger_telegram",
            json!({"allowed_user_ids": [10, 20]}),
        );
        assert!(matches(
            &config,
            "telegram_message",
            &json!({"user_id": 10, "text": "hi"})
        ));
        assert!(!matches(
            &config,
            "telegram_message",
            &json!({"user_id": 99, "text": "hi"})
        ));
    }

    #[test]
    fn telegram_pattern_and_command_filters() {
        let pattern = trigger_config("trigger_telegram", json!({"pattern": "deploy"}));
        assert!(matches(
            &pattern,
            "telegram_message",
            &json!({"text": "please DEPLOY now"})
        ));
        assert!(!matches(
            &pattern,
            "telegram_message",
            &json!({"text": "hello"})
        ));

        let command = trigger_config("trigger_telegram", json!({"command": "start"}));
        assert!(matches(
            &command,
            "telegram_message",
            &json!({"text": "/start please"})
        ));
        assert!(!matches(
            &command,
            "telegram_message",
            &json!({"text": "start"})
        ));
    }

    #[test]
    fn webhook_path_equality() {
        let config = trigger_config("trigger_webhook", json!({"path": "deploy-hook"}));
        assert!(matches(&config, "webhook", &json!({"path": "deploy-hook"})));
        assert!(!matches(&config, "webhook", &json!({"path": "other"})));

        let open = trigger_config("trigger_webhook", json!({}));
        assert!(matches(&open, "webhook", &json!({"path": "anything"})));
    }

    #[test]
    fn workflow_event_source_filter() {
        let config = trigger_config("trigger_workflow", json!({"source_workflow": "parent"}));
        assert!(matches(
            &config,
            "workflow",
            &json!({"source_workflow": "parent"})
        ));
        assert!(!matches(
            &config,
            "workflow",
            &json!({"source_workflow": "other"})
        ));

        let open = trigger_config("trigger_workflow", json!({}));
        assert!(matches(&open, "workflow", &json!({"source_workflow": "x"})));
    }

    #[test]
    fn manual_and_error_match_unconditionally() {
        let config = trigger_config("trigger_manual", json!({}));
        assert!(matches(&config, "manual", &json!({})));
        let config = trigger_config("trigger_error", json!({}));
        assert!(matches(&config, "error", &json!({"error": "boom"})));
    }
}
