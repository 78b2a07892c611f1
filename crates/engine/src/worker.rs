//! Worker harness — polls a named queue and dispatches jobs to the
//! orchestrator and scheduler.
//!
//! A claimed job stays `processing` until dispatch returns, so the
//! orchestrator's drained-DAG check always sees in-flight node work. A
//! worker crash mid-job leaves the row `processing`; recovery is the
//! zombie sweeper's job, never queue redelivery (which would double-run
//! nodes).

use std::sync::Arc;
use std::time::Duration;

use queue::{Job, JobQueue, QueueName};
use tokio::sync::watch;
use tracing::{error, info};

use crate::orchestrator::Orchestrator;
use crate::scheduler::Scheduler;
use crate::spawn;
use crate::EngineError;

/// Poll interval when the queue is empty.
const IDLE_POLL: Duration = Duration::from_millis(500);

pub struct Worker {
    orchestrator: Arc<Orchestrator>,
    scheduler: Arc<Scheduler>,
    queue: JobQueue,
    queue_name: QueueName,
}

impl Worker {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        scheduler: Arc<Scheduler>,
        queue: JobQueue,
        queue_name: QueueName,
    ) -> Self {
        Self {
            orchestrator,
            scheduler,
            queue,
            queue_name,
        }
    }

    /// Run until the shutdown signal flips. Each worker processes one job
    /// at a time.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(queue = self.queue_name.as_str(), "worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.queue.fetch_next(self.queue_name).await {
                Ok(Some((row, job))) => match self.dispatch(job).await {
                    Ok(()) => {
                        if let Err(err) = self.queue.complete(row.id).await {
                            error!("job ack failed: {err}");
                        }
                    }
                    Err(err) => {
                        error!("job dispatch failed: {err}");
                        if let Err(err) = self.queue.fail(row.id).await {
                            error!("job nack failed: {err}");
                        }
                    }
                },
                Ok(None) => {
                    tokio::select! {
                        _ = tokio::time::sleep(IDLE_POLL) => {}
                        _ = shutdown.changed() => {}
                    }
                }
                Err(err) => {
                    error!("queue poll failed: {err}");
                    tokio::time::sleep(IDLE_POLL).await;
                }
            }
        }
        info!(queue = self.queue_name.as_str(), "worker stopped");
    }

    async fn dispatch(&self, job: Job) -> Result<(), EngineError> {
        match job {
            Job::ExecuteWorkflowJob { execution_id } => {
                self.orchestrator.start_execution(execution_id).await
            }
            Job::ResumeWorkflowJob {
                execution_id,
                user_input,
            } => {
                self.orchestrator
                    .resume_workflow_job(execution_id, user_input)
                    .await
            }
            Job::ExecuteNodeJob {
                execution_id,
                node_id,
                retry_count,
            } => {
                self.orchestrator
                    .execute_node_job(execution_id, &node_id, retry_count)
                    .await
            }
            Job::ExecuteScheduledJobTask {
                job_id,
                current_repeat,
                current_retry,
            } => {
                self.scheduler
                    .execute_scheduled_job(job_id, current_repeat, current_retry)
                    .await
            }
            Job::CleanupStuckChildWaitsJob => {
                spawn::cleanup_stuck_child_waits(&self.orchestrator)
                    .await
                    .map(|_| ())
            }
        }
    }
}
