//! Typed job payloads — the queue boundary contract.
//!
//! The orchestrator uses exactly these function names at the queue
//! boundary; the serialised form is `{"function": …, args…}` so payloads
//! stay readable in the database.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Named queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueName {
    Workflows,
    Scheduled,
    Browser,
    GitSync,
}

impl QueueName {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Workflows => "workflows",
            Self::Scheduled => "scheduled",
            Self::Browser => "browser",
            Self::GitSync => "git-sync",
        }
    }
}

/// One queued unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "function", rename_all = "snake_case")]
pub enum Job {
    /// Start a pending execution: build the topology, seed state, enqueue
    /// entry nodes.
    ExecuteWorkflowJob { execution_id: Uuid },

    /// Resume an interrupted execution with external input.
    ResumeWorkflowJob {
        execution_id: Uuid,
        user_input: serde_json::Value,
    },

    /// Run one node attempt.
    ExecuteNodeJob {
        execution_id: Uuid,
        node_id: String,
        retry_count: i32,
    },

    /// Fire one tick of a recurring scheduled job.
    ExecuteScheduledJobTask {
        job_id: Uuid,
        current_repeat: i32,
        current_retry: i32,
    },

    /// Sweep executions stuck waiting on children that already terminated.
    CleanupStuckChildWaitsJob,
}

impl Job {
    /// The queue this job belongs on.
    pub fn queue(&self) -> QueueName {
        match self {
            Self::ExecuteScheduledJobTask { .. } => QueueName::Scheduled,
            _ => QueueName::Workflows,
        }
    }

    /// Stable function name, mirrored in the serialised payload.
    pub fn function_name(&self) -> &'static str {
        match self {
            Self::ExecuteWorkflowJob { .. } => "execute_workflow_job",
            Self::ResumeWorkflowJob { .. } => "resume_workflow_job",
            Self::ExecuteNodeJob { .. } => "execute_node_job",
            Self::ExecuteScheduledJobTask { .. } => "execute_scheduled_job_task",
            Self::CleanupStuckChildWaitsJob => "cleanup_stuck_child_waits_job",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payloads_round_trip() {
        let jobs = vec![
            Job::ExecuteWorkflowJob {
                execution_id: Uuid::new_v4(),
            },
            Job::ResumeWorkflowJob {
                execution_id: Uuid::new_v4(),
                user_input: json!("yes"),
            },
            Job::ExecuteNodeJob {
                execution_id: Uuid::new_v4(),
                node_id: "step_a".into(),
                retry_count: 2,
            },
            Job::ExecuteScheduledJobTask {
                job_id: Uuid::new_v4(),
                current_repeat: 1,
                current_retry: 0,
            },
            Job::CleanupStuckChildWaitsJob,
        ];
        for job in jobs {
            let value = serde_json::to_value(&job).unwrap();
            assert_eq!(value["function"], job.function_name());
            let back: Job = serde_json::from_value(value).unwrap();
            assert_eq!(back, job);
        }
    }

    #[test]
    fn scheduled_jobs_go_to_the_scheduled_queue() {
        let job = Job::ExecuteScheduledJobTask {
            job_id: Uuid::new_v4(),
            current_repeat: 0,
            current_retry: 0,
        };
        assert_eq!(job.queue(), QueueName::Scheduled);
        assert_eq!(
            Job::CleanupStuckChildWaitsJob.queue(),
            QueueName::Workflows
        );
    }
}
