//! Recurring scheduler — self-rescheduling jobs with retry/back-off,
//! pause/resume, and an overdue sweep.
//!
//! Each fire dispatches the job's workflow as if a `schedule` event had
//! hit its trigger, then either re-enqueues itself with `interval_seconds`
//! delay (success) or backs off exponentially until `max_retries` and dies.

use chrono::{Duration as ChronoDuration, Utc};
use db::models::{ScheduledJobRow, ScheduledJobStatus};
use db::repository::scheduled_jobs as sched_repo;
use db::DbPool;
use queue::{Job, JobQueue};
use serde_json::json;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::triggers;
use crate::EngineError;

/// Cap for the failure back-off.
const RETRY_CAP_SECONDS: i64 = 300;

pub struct Scheduler {
    pool: DbPool,
    queue: JobQueue,
}

impl Scheduler {
    pub fn new(pool: DbPool, queue: JobQueue) -> Self {
        Self { pool, queue }
    }

    /// One fire of a scheduled job. `current_repeat`/`current_retry` echo
    /// the queue payload; the row is authoritative when they disagree.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub async fn execute_scheduled_job(
        &self,
        job_id: Uuid,
        current_repeat: i32,
        current_retry: i32,
    ) -> Result<(), EngineError> {
        let job = match sched_repo::get_scheduled_job(&self.pool, job_id).await {
            Ok(job) => job,
            Err(db::DbError::NotFound) => {
                warn!("scheduled job vanished; dropping");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        if job.status() != ScheduledJobStatus::Active {
            info!(status = %job.status, "scheduled job not active; dropping");
            return Ok(());
        }

        match self.fire(&job).await {
            Ok(execution_id) => {
                let completed_repeats = job.current_repeat + 1;
                let finished = job.total_repeats > 0 && completed_repeats >= job.total_repeats;
                let (status, next_run_at) = if finished {
                    (ScheduledJobStatus::Done, None)
                } else {
                    (
                        ScheduledJobStatus::Active,
                        Some(Utc::now() + ChronoDuration::seconds(job.interval_seconds as i64)),
                    )
                };
                sched_repo::record_success(&self.pool, job_id, status, next_run_at).await?;

                if !finished {
                    self.queue
                        .enqueue_in(
                            Job::ExecuteScheduledJobTask {
                                job_id,
                                current_repeat: completed_repeats,
                                current_retry: 0,
                            },
                            job.interval_seconds as f64,
                        )
                        .await?;
                }
                info!(
                    execution = ?execution_id,
                    repeat = completed_repeats,
                    finished,
                    "scheduled job fired"
                );
                Ok(())
            }
            Err(err) => {
                let next_retry = job.current_retry + 1;
                if next_retry < job.max_retries {
                    let delay = (2i64.pow(next_retry as u32)).min(RETRY_CAP_SECONDS);
                    sched_repo::record_failure(
                        &self.pool,
                        job_id,
                        ScheduledJobStatus::Active,
                        Some(Utc::now() + ChronoDuration::seconds(delay)),
                        &err.to_string(),
                    )
                    .await?;
                    self.queue
                        .enqueue_in(
                            Job::ExecuteScheduledJobTask {
                                job_id,
                                current_repeat,
                                current_retry: next_retry,
                            },
                            delay as f64,
                        )
                        .await?;
                    warn!(retry = next_retry, delay, "scheduled job failed; backing off");
                } else {
                    sched_repo::record_failure(
                        &self.pool,
                        job_id,
                        ScheduledJobStatus::Dead,
                        None,
                        &err.to_string(),
                    )
                    .await?;
                    warn!("scheduled job exhausted retries; marked dead");
                }
                Ok(())
            }
        }
    }

    /// Dispatch the job's workflow with its stored trigger payload.
    async fn fire(&self, job: &ScheduledJobRow) -> Result<Uuid, EngineError> {
        let mut payload = job.trigger_payload.clone().unwrap_or(json!({}));
        if let Some(obj) = payload.as_object_mut() {
            obj.insert("scheduled_job_id".to_string(), json!(job.id));
            obj.insert("repeat".to_string(), json!(job.current_repeat));
        }
        triggers::dispatch_to_workflow(
            &self.pool,
            &self.queue,
            job.workflow_id,
            "trigger_schedule",
            payload,
            job.user_profile_id,
        )
        .await
    }

    // -----------------------------------------------------------------------
    // State transitions
    // -----------------------------------------------------------------------

    /// Activate a job and enqueue its first fire `interval_seconds` out.
    pub async fn start_scheduled_job(&self, job_id: Uuid) -> Result<(), EngineError> {
        let job = sched_repo::get_scheduled_job(&self.pool, job_id).await?;
        sched_repo::set_status(&self.pool, job_id, ScheduledJobStatus::Active).await?;
        self.queue
            .enqueue_in(
                Job::ExecuteScheduledJobTask {
                    job_id,
                    current_repeat: job.current_repeat,
                    current_retry: 0,
                },
                job.interval_seconds as f64,
            )
            .await?;
        Ok(())
    }

    /// Pause: in-flight queue jobs observe the status and drop.
    pub async fn pause_scheduled_job(&self, job_id: Uuid) -> Result<(), EngineError> {
        sched_repo::set_status(&self.pool, job_id, ScheduledJobStatus::Paused).await?;
        Ok(())
    }

    /// Resume a paused job; re-enqueues the next fire.
    pub async fn resume_scheduled_job(&self, job_id: Uuid) -> Result<(), EngineError> {
        let job = sched_repo::get_scheduled_job(&self.pool, job_id).await?;
        if job.status() != ScheduledJobStatus::Paused {
            return Ok(());
        }
        self.start_scheduled_job(job_id).await
    }

    /// Stop permanently (does not fire again; counters stay).
    pub async fn stop_scheduled_job(&self, job_id: Uuid) -> Result<(), EngineError> {
        sched_repo::set_status(&self.pool, job_id, ScheduledJobStatus::Stopped).await?;
        Ok(())
    }

    /// Re-enqueue active jobs whose `next_run_at` passed without a queue
    /// job (lost delayed enqueue, process restart).
    pub async fn sweep_overdue(&self) -> Result<usize, EngineError> {
        let overdue = sched_repo::list_overdue(&self.pool, Utc::now()).await?;
        let count = overdue.len();
        for job in overdue {
            self.queue
                .enqueue(Job::ExecuteScheduledJobTask {
                    job_id: job.id,
                    current_repeat: job.current_repeat,
                    current_retry: job.current_retry,
                })
                .await?;
        }
        if count > 0 {
            info!(count, "re-enqueued overdue scheduled jobs");
        }
        Ok(count)
    }
}
