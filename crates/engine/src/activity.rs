//! Activity summary — aggregated counters emitted alongside terminal
//! execution events.

use db::repository::{executions as exec_repo, logs as logs_repo};
use db::DbPool;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::EngineError;

/// Compose the `{total_steps, total_duration_ms, total_tokens,
/// total_cost_usd, llm_calls, tool_invocations}` summary for an execution.
pub async fn activity_summary(pool: &DbPool, execution_id: Uuid) -> Result<Value, EngineError> {
    let execution = exec_repo::get_execution(pool, execution_id).await?;
    let logs = logs_repo::list_logs(pool, execution_id).await?;

    let terminal: Vec<_> = logs.iter().filter(|l| l.status().is_terminal()).collect();
    let total_duration_ms: i64 = terminal.iter().map(|l| l.duration_ms).sum();

    Ok(json!({
        "total_steps": terminal.len(),
        "total_duration_ms": total_duration_ms,
        "total_tokens": execution.total_tokens,
        "total_cost_usd": execution.total_cost_usd,
        "llm_calls": execution.llm_calls,
        "tool_invocations": execution.tool_invocations,
    }))
}
