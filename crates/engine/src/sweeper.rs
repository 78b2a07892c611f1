//! Zombie sweeper — detects executions that stopped making progress and
//! either gives them one more push or declares them dead.

use chrono::{Duration as ChronoDuration, Utc};
use db::repository::{executions as exec_repo, logs as logs_repo, pending_tasks as tasks_repo};
use queue::Job;
use serde_json::json;
use tracing::{info, warn};

use crate::orchestrator::Orchestrator;
use crate::EngineError;

/// Default progress threshold.
pub const ZOMBIE_EXECUTION_THRESHOLD_SECONDS: i64 = 900;

pub struct Sweeper<'a> {
    orchestrator: &'a Orchestrator,
    threshold_seconds: i64,
}

impl<'a> Sweeper<'a> {
    pub fn new(orchestrator: &'a Orchestrator) -> Self {
        Self {
            orchestrator,
            threshold_seconds: ZOMBIE_EXECUTION_THRESHOLD_SECONDS,
        }
    }

    pub fn with_threshold(mut self, threshold_seconds: i64) -> Self {
        self.threshold_seconds = threshold_seconds;
        self
    }

    /// One sweep pass. Returns how many executions were touched.
    pub async fn sweep(&self) -> Result<usize, EngineError> {
        let pool = self.orchestrator.pool();
        let cutoff = Utc::now() - ChronoDuration::seconds(self.threshold_seconds);
        let stale = exec_repo::list_stale_running(pool, cutoff).await?;
        let mut touched = 0usize;

        for execution in stale {
            touched += 1;

            // One reschedule per execution, tracked on the row; after that
            // the execution is a zombie.
            if execution.retry_count == 0 {
                exec_repo::increment_retry_count(pool, execution.execution_id).await?;
                let node_id = match logs_repo::latest_log(pool, execution.execution_id).await? {
                    Some(log) => log.node_id,
                    None => continue,
                };
                warn!(
                    execution = %execution.execution_id,
                    node_id,
                    "stalled execution; rescheduling latest node once"
                );
                self.orchestrator
                    .queue()
                    .enqueue(Job::ExecuteNodeJob {
                        execution_id: execution.execution_id,
                        node_id,
                        retry_count: 0,
                    })
                    .await?;
            } else {
                warn!(execution = %execution.execution_id, "zombie execution; failing");
                exec_repo::fail_execution(
                    pool,
                    execution.execution_id,
                    &format!(
                        "no progress in {} seconds (ZOMBIE)",
                        self.threshold_seconds
                    ),
                )
                .await?;
                logs_repo::insert_log(
                    pool,
                    &logs_repo::NewLog {
                        execution_id: execution.execution_id,
                        node_id: String::new(),
                        status: db::models::LogStatus::Failed,
                        input: None,
                        output: None,
                        error: "execution made no progress".into(),
                        error_code: Some("ZOMBIE".into()),
                        metadata: None,
                        retry_count: execution.retry_count,
                        duration_ms: 0,
                    },
                )
                .await?;
                self.orchestrator.publish(
                    &execution,
                    events::EventType::ExecutionFailed,
                    json!({"error_code": "ZOMBIE"}),
                );
            }
        }

        // Workflow time budget: running past max_execution_seconds fails
        // regardless of log progress.
        for execution in exec_repo::list_over_budget(pool).await? {
            touched += 1;
            warn!(execution = %execution.execution_id, "execution over time budget; failing");
            exec_repo::fail_execution(
                pool,
                execution.execution_id,
                "exceeded max_execution_seconds",
            )
            .await?;
            self.orchestrator.publish(
                &execution,
                events::EventType::ExecutionFailed,
                json!({"error_code": "NODE_TIMEOUT"}),
            );
        }

        // Expired confirmation tickets resolve as cancelled.
        let expired = self.resolve_expired_confirmations().await?;
        if touched > 0 || expired > 0 {
            info!(touched, expired, "zombie sweep complete");
        }
        Ok(touched)
    }

    /// Executions parked on a confirmation whose ticket expired get a
    /// synthetic `cancelled` answer.
    async fn resolve_expired_confirmations(&self) -> Result<usize, EngineError> {
        let pool = self.orchestrator.pool();
        let mut resolved = 0usize;

        // Find interrupted executions whose every ticket is past expiry.
        let waiting = exec_repo::list_waiting_on_confirmation(pool).await?;
        for execution in waiting {
            let tasks = tasks_repo::list_for_execution(pool, execution.execution_id).await?;
            if tasks.is_empty() || tasks.iter().any(|t| t.expires_at > Utc::now()) {
                continue;
            }
            resolved += 1;
            self.orchestrator
                .resume_workflow_job(execution.execution_id, json!("cancelled"))
                .await?;
        }
        Ok(resolved)
    }
}
