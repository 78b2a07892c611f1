//! `queue` crate — the durable job queue the workers consume.
//!
//! Jobs are `(function_name, args)` tuples serialised into the `job_queue`
//! table; named queues separate workflow traffic from scheduled jobs.
//! Delayed enqueues honour the computed delay to the second.

pub mod error;
pub mod job;

pub use error::QueueError;
pub use job::{Job, QueueName};

use chrono::{Duration as ChronoDuration, Utc};
use db::models::JobRow;
use db::repository::jobs as jobs_repo;
use db::DbPool;
use tracing::debug;

/// Default attempts before a queue job dead-letters. Orchestrator-level
/// retries are handled above the queue, so queue attempts stay low.
const DEFAULT_MAX_ATTEMPTS: i32 = 3;

/// Handle to the durable queue. Cheap to clone.
#[derive(Clone)]
pub struct JobQueue {
    pool: DbPool,
}

impl JobQueue {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Enqueue a job for immediate delivery.
    pub async fn enqueue(&self, job: Job) -> Result<JobRow, QueueError> {
        self.enqueue_in(job, 0.0).await
    }

    /// Enqueue a job delayed by `delay_seconds` (fractional seconds are
    /// rounded down to whole seconds; the contract is to-the-second).
    pub async fn enqueue_in(&self, job: Job, delay_seconds: f64) -> Result<JobRow, QueueError> {
        let queue = job.queue();
        let scheduled_at = Utc::now() + ChronoDuration::seconds(delay_seconds.max(0.0) as i64);
        let payload = serde_json::to_value(&job)?;
        debug!(queue = queue.as_str(), delay_seconds, "enqueue {}", job.function_name());
        let row = jobs_repo::enqueue_job(
            &self.pool,
            queue.as_str(),
            payload,
            scheduled_at,
            DEFAULT_MAX_ATTEMPTS,
        )
        .await?;
        Ok(row)
    }

    /// Claim the next due job on a queue, if any.
    pub async fn fetch_next(&self, queue: QueueName) -> Result<Option<(JobRow, Job)>, QueueError> {
        let Some(row) = jobs_repo::fetch_next_job(&self.pool, queue.as_str()).await? else {
            return Ok(None);
        };
        let job: Job = serde_json::from_value(row.payload.clone())?;
        Ok(Some((row, job)))
    }

    /// Acknowledge successful processing.
    pub async fn complete(&self, job_id: uuid::Uuid) -> Result<(), QueueError> {
        jobs_repo::complete_job(&self.pool, job_id).await?;
        Ok(())
    }

    /// Report failed processing; the row returns to pending or dead-letters.
    pub async fn fail(&self, job_id: uuid::Uuid) -> Result<(), QueueError> {
        jobs_repo::fail_job(&self.pool, job_id).await?;
        Ok(())
    }
}
