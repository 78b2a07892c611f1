//! The orchestrator — per-node execution driver.
//!
//! Single-leader per execution_id: every node job runs under an advisory
//! lease, so all node attempts for one execution observe a strict
//! happens-before even with many workers. A node job runs to completion;
//! logical suspension (human confirmation, spawn_and_await, sub-workflow)
//! means the job returns without enqueuing successors and an external
//! signal re-enqueues work later.

use std::sync::Arc;
use std::time::Instant;

use chrono::{Duration as ChronoDuration, Utc};
use components::state::{
    deserialize_state, merge_state, serialize_state, InterruptPayload, Message, StateDelta,
    WorkflowState,
};
use components::traits::ComponentContext;
use components::{build_component, ComponentError, ErrorCode};
use db::models::{ExecutionStatus, LogStatus, WorkflowExecutionRow, WorkflowRow};
use db::repository::{
    executions as exec_repo, jobs as jobs_repo, logs as logs_repo, nodes as nodes_repo,
    pending_tasks as tasks_repo, workflows as workflows_repo,
};
use db::DbPool;
use events::broadcaster::execution_channel;
use events::{Event, EventType};
use queue::{Job, JobQueue};
use rand::Rng;
use serde_json::{json, Value};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::activity::activity_summary;
use crate::builder::{build_component_spec, cached_topology};
use crate::cache::GraphCache;
use crate::services::{BroadcastActivitySink, EngineServices};
use crate::spawn::{self, WaitState};
use crate::topology::Topology;
use crate::EngineError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning knobs for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Fallback when neither node config nor execution row carries a limit.
    pub default_max_retries: i32,
    /// Base for exponential back-off between node retries, in seconds.
    pub retry_base_seconds: f64,
    /// Cap for the node retry back-off, in seconds.
    pub retry_cap_seconds: f64,
    /// Requeue delay when the execution lease is contended.
    pub lease_retry_seconds: f64,
    /// Pending confirmation tickets expire after this long.
    pub pending_task_ttl_seconds: i64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_max_retries: 3,
            retry_base_seconds: 1.0,
            retry_cap_seconds: 60.0,
            lease_retry_seconds: 1.0,
            pending_task_ttl_seconds: 3600,
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    pool: DbPool,
    queue: JobQueue,
    cache: Arc<GraphCache>,
    services: EngineServices,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        pool: DbPool,
        queue: JobQueue,
        cache: Arc<GraphCache>,
        services: EngineServices,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            pool,
            queue,
            cache,
            services,
            config,
        }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn services(&self) -> &EngineServices {
        &self.services
    }

    // -----------------------------------------------------------------------
    // start_execution
    // -----------------------------------------------------------------------

    /// Mark a pending execution running, seed its state, and enqueue a job
    /// for each entry node.
    #[instrument(skip(self), fields(execution_id = %execution_id))]
    pub async fn start_execution(&self, execution_id: Uuid) -> Result<(), EngineError> {
        let execution = exec_repo::get_execution(&self.pool, execution_id).await?;
        if execution.status().is_terminal() {
            return Ok(());
        }
        let workflow = workflows_repo::get_workflow(&self.pool, execution.workflow_id).await?;
        let topology = cached_topology(
            &self.pool,
            &self.cache,
            &workflow,
            execution.trigger_node_id,
        )
        .await?;

        let trigger = execution.trigger_payload.clone().unwrap_or(json!({}));
        let mut state = WorkflowState::initial(execution_id.to_string(), trigger.clone());
        if let Some(text) = trigger.get("text").and_then(Value::as_str) {
            if !text.is_empty() {
                state.messages.push(Message::human(text));
            }
        }

        exec_repo::save_state(&self.pool, execution_id, &serialize_state(&state)).await?;
        exec_repo::update_execution_status(&self.pool, execution_id, ExecutionStatus::Running)
            .await?;

        self.publish(
            &execution,
            EventType::ExecutionStarted,
            json!({
                "workflow": workflow.slug,
                "entry_nodes": topology.entry_node_ids,
            }),
        );

        for node_id in &topology.entry_node_ids {
            self.queue
                .enqueue(Job::ExecuteNodeJob {
                    execution_id,
                    node_id: node_id.clone(),
                    retry_count: 0,
                })
                .await?;
        }
        info!(
            workflow = %workflow.slug,
            entries = topology.entry_node_ids.len(),
            "execution started"
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // execute_node_job
    // -----------------------------------------------------------------------

    /// The worker-facing unit of work: one node attempt.
    #[instrument(skip(self), fields(execution_id = %execution_id, node_id = %node_id, retry_count))]
    pub async fn execute_node_job(
        &self,
        execution_id: Uuid,
        node_id: &str,
        retry_count: i32,
    ) -> Result<(), EngineError> {
        // The advisory lease is connection-scoped; hold one connection for
        // the whole invocation.
        let mut lease_conn = self.pool.acquire().await.map_err(db::DbError::from)?;
        let acquired = jobs_repo::try_acquire_execution_lease(&mut lease_conn, execution_id).await?;
        if !acquired {
            self.queue
                .enqueue_in(
                    Job::ExecuteNodeJob {
                        execution_id,
                        node_id: node_id.to_string(),
                        retry_count,
                    },
                    self.config.lease_retry_seconds,
                )
                .await?;
            return Ok(());
        }

        let outcome = self
            .execute_node_inner(execution_id, node_id, retry_count)
            .await;

        let released = jobs_repo::release_execution_lease(&mut lease_conn, execution_id).await;
        if let Err(err) = released {
            warn!("lease release failed: {err}");
        }
        outcome
    }

    async fn execute_node_inner(
        &self,
        execution_id: Uuid,
        node_id: &str,
        retry_count: i32,
    ) -> Result<(), EngineError> {
        // Re-read under the lease; cancellation and completion are observed
        // here and the job drops without side effects.
        let execution = exec_repo::get_execution(&self.pool, execution_id).await?;
        if execution.status().is_terminal() {
            return Ok(());
        }

        let workflow = workflows_repo::get_workflow(&self.pool, execution.workflow_id).await?;
        let topology = cached_topology(
            &self.pool,
            &self.cache,
            &workflow,
            execution.trigger_node_id,
        )
        .await?;

        let Some(node) = topology.nodes.get(node_id).cloned() else {
            return self
                .fail_with(
                    &execution,
                    &workflow,
                    node_id,
                    retry_count,
                    ErrorCode::Validation,
                    &format!("node '{node_id}' not in topology"),
                )
                .await;
        };

        let mut state = self.load_state(&execution)?;

        // Inbound-ready gate: every control-flow predecessor needs a
        // terminal log. Early arrivals at a join drop; the last
        // predecessor's enqueue passes.
        if !self
            .predecessors_terminal(&execution, &topology, node_id)
            .await?
        {
            return Ok(());
        }

        // Duplicate suppression outside loop bodies.
        if retry_count == 0 && topology.loop_containing(node_id).is_none() {
            let latest = logs_repo::latest_logs_by_node(&self.pool, execution_id).await?;
            if latest
                .iter()
                .any(|log| log.node_id == node_id && log.status() == LogStatus::Success)
            {
                return Ok(());
            }
        }

        let spec = build_component_spec(&self.pool, &workflow, &node, &state).await?;

        // interrupt_before: suspend instead of running (unless resuming).
        if node.interrupt_before && state.resume_input.is_none() {
            return self
                .interrupt_for_human(&execution, &node.node_id, &spec, retry_count)
                .await;
        }

        let ctx = ComponentContext {
            execution_id: execution_id.to_string(),
            workflow_id: workflow.id,
            workflow_slug: workflow.slug.clone(),
            thread_id: execution.thread_id.clone(),
            user_id: execution.user_profile_id,
            llm: Arc::clone(&self.services.llm),
            checkpoints: Arc::clone(&self.services.checkpoints),
            host_tools: Arc::clone(&self.services.host_tools),
            http: self.services.http.clone(),
            activity: Arc::new(BroadcastActivitySink::new(
                Arc::clone(&self.services.broadcaster),
                execution_id.to_string(),
            )),
        };

        let component = match build_component(&spec) {
            Ok(component) => component,
            Err(err) => {
                return self
                    .fail_with(
                        &execution,
                        &workflow,
                        node_id,
                        retry_count,
                        err.code(),
                        err.message(),
                    )
                    .await;
            }
        };

        let started = Instant::now();
        state.current_node = node_id.to_string();
        let result = component.run(&state, &ctx).await;
        let duration_ms = started.elapsed().as_millis() as i64;

        match result {
            Ok(delta) => {
                self.handle_success(
                    &execution, &workflow, &topology, node_id, retry_count, state, delta,
                    duration_ms,
                )
                .await
            }
            Err(err) => {
                self.handle_failure(
                    &execution, &workflow, &topology, node_id, retry_count, state, err,
                    duration_ms,
                )
                .await
            }
        }
    }

    // -----------------------------------------------------------------------
    // Success path
    // -----------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    async fn handle_success(
        &self,
        execution: &WorkflowExecutionRow,
        workflow: &WorkflowRow,
        topology: &Topology,
        node_id: &str,
        retry_count: i32,
        mut state: WorkflowState,
        delta: StateDelta,
        duration_ms: i64,
    ) -> Result<(), EngineError> {
        // Component asked for suspension (spawn_and_await / sub-workflow).
        if let Some(interrupt) = delta.interrupt.clone() {
            return self
                .handle_interrupt(
                    execution, workflow, node_id, retry_count, state, delta, interrupt,
                    duration_ms,
                )
                .await;
        }

        let node_output = delta
            .node_outputs
            .get(node_id)
            .cloned()
            .or_else(|| delta.output.clone());
        let usage = delta.token_usage;

        merge_state(&mut state, &delta);
        exec_repo::save_state(&self.pool, execution.execution_id, &serialize_state(&state))
            .await?;
        if let Some(usage) = usage {
            exec_repo::add_usage(
                &self.pool,
                execution.execution_id,
                usage.input_tokens,
                usage.output_tokens,
                usage.cost_usd,
                usage.llm_calls,
                usage.tool_invocations,
            )
            .await?;
        }

        let metadata = usage.map(|u| {
            json!({
                "input_tokens": u.input_tokens,
                "output_tokens": u.output_tokens,
                "cost_usd": u.cost_usd,
                "llm_calls": u.llm_calls,
                "tool_invocations": u.tool_invocations,
            })
        });
        logs_repo::insert_log(
            &self.pool,
            &logs_repo::NewLog {
                execution_id: execution.execution_id,
                node_id: node_id.to_string(),
                status: LogStatus::Success,
                input: None,
                output: node_output,
                error: String::new(),
                error_code: None,
                metadata,
                retry_count,
                duration_ms,
            },
        )
        .await?;

        self.publish(
            execution,
            EventType::NodeStatus,
            json!({"node_id": node_id, "status": "success", "retry_count": retry_count}),
        );
        self.publish_state(execution, &state);

        // interrupt_after: hold here; resume continues to the successors.
        if topology
            .nodes
            .get(node_id)
            .is_some_and(|n| n.interrupt_after)
        {
            let wait_state = WaitState::After {
                node_id: node_id.to_string(),
            };
            exec_repo::save_wait_state(
                &self.pool,
                execution.execution_id,
                Some(&serde_json::to_value(&wait_state).expect("wait state serialises")),
            )
            .await?;
            exec_repo::update_execution_status(
                &self.pool,
                execution.execution_id,
                ExecutionStatus::Interrupted,
            )
            .await?;
            return Ok(());
        }

        self.select_next(execution, workflow, topology, node_id, &state, &delta)
            .await
    }

    // -----------------------------------------------------------------------
    // Next-node selection
    // -----------------------------------------------------------------------

    async fn select_next(
        &self,
        execution: &WorkflowExecutionRow,
        workflow: &WorkflowRow,
        topology: &Topology,
        node_id: &str,
        state: &WorkflowState,
        delta: &StateDelta,
    ) -> Result<(), EngineError> {
        let delay = delta.delay_seconds.unwrap_or(0.0);

        // Loop launch: one iteration per item, sequential.
        if let Some(signal) = &delta.loop_signal {
            if topology.loop_bodies.contains_key(node_id) && !signal.items.is_empty() {
                return self
                    .start_loop(execution, node_id, topology, signal.items.clone())
                    .await;
            }
            // No body or no items: fall through to normal successors.
        }

        // Loop return: fold the body result and advance the iteration.
        for loop_id in topology.loops_returned_by(node_id) {
            if crate::spawn::loop_is_active(state, loop_id) {
                return self
                    .advance_loop(execution, workflow, topology, loop_id, node_id, state)
                    .await;
            }
        }

        let outgoing: Vec<&crate::topology::EdgeInfo> = topology
            .edges_by_source
            .get(node_id)
            .map(|edges| {
                edges
                    .iter()
                    .filter(|e| e.edge_label.is_empty())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        let route = delta.route.clone().unwrap_or_else(|| state.route.clone());
        let targets = route_targets(&outgoing, &route);

        for target in &targets {
            self.queue
                .enqueue_in(
                    Job::ExecuteNodeJob {
                        execution_id: execution.execution_id,
                        node_id: target.clone(),
                        retry_count: 0,
                    },
                    delay,
                )
                .await?;
        }

        if targets.is_empty() {
            self.complete_if_drained(execution, workflow, node_id, state)
                .await?;
        }
        Ok(())
    }

    /// All branches ended; if no node jobs remain in flight, the execution
    /// is complete.
    async fn complete_if_drained(
        &self,
        execution: &WorkflowExecutionRow,
        workflow: &WorkflowRow,
        current_node_id: &str,
        state: &WorkflowState,
    ) -> Result<(), EngineError> {
        let active = jobs_repo::count_active_node_jobs(
            &self.pool,
            execution.execution_id,
            current_node_id,
        )
        .await?;
        if active > 0 {
            return Ok(());
        }

        let final_output = json!({
            "output": state.output,
            "node_outputs": state.node_outputs,
        });
        exec_repo::set_final_output(&self.pool, execution.execution_id, &final_output).await?;
        exec_repo::update_execution_status(
            &self.pool,
            execution.execution_id,
            ExecutionStatus::Completed,
        )
        .await?;

        let summary = activity_summary(&self.pool, execution.execution_id).await?;
        self.publish(
            execution,
            EventType::ExecutionCompleted,
            json!({"final_output": final_output, "activity": summary}),
        );
        info!(workflow = %workflow.slug, "execution completed");

        spawn::notify_parent_if_child(self, execution.execution_id).await
    }

    // -----------------------------------------------------------------------
    // Loops
    // -----------------------------------------------------------------------

    async fn start_loop(
        &self,
        execution: &WorkflowExecutionRow,
        loop_id: &str,
        topology: &Topology,
        items: Vec<Value>,
    ) -> Result<(), EngineError> {
        let mut state = self.load_state(&exec_repo::get_execution(&self.pool, execution.execution_id).await?)?;
        state.loop_state = json!({
            "loop_id": loop_id,
            "items": items,
            "index": 0,
            "results": [],
            "active": true,
            "current_item": items.first().cloned().unwrap_or(Value::Null),
        });
        exec_repo::save_state(&self.pool, execution.execution_id, &serialize_state(&state))
            .await?;

        for body_entry in topology.loop_bodies.get(loop_id).into_iter().flatten() {
            self.queue
                .enqueue(Job::ExecuteNodeJob {
                    execution_id: execution.execution_id,
                    node_id: body_entry.clone(),
                    retry_count: 0,
                })
                .await?;
        }
        Ok(())
    }

    /// A loop_return source finished one iteration: append its output to
    /// the results, then either launch the next iteration or finish the
    /// loop and continue past it.
    async fn advance_loop(
        &self,
        execution: &WorkflowExecutionRow,
        workflow: &WorkflowRow,
        topology: &Topology,
        loop_id: &str,
        return_node_id: &str,
        state: &WorkflowState,
    ) -> Result<(), EngineError> {
        let mut state = state.clone();
        let result = state
            .node_outputs
            .get(return_node_id)
            .cloned()
            .unwrap_or(Value::Null);
        self.advance_loop_with_result(execution, workflow, topology, loop_id, result, &mut state)
            .await
    }

    async fn advance_loop_with_result(
        &self,
        execution: &WorkflowExecutionRow,
        workflow: &WorkflowRow,
        topology: &Topology,
        loop_id: &str,
        result: Value,
        state: &mut WorkflowState,
    ) -> Result<(), EngineError> {
        let mut loop_state = state.loop_state.clone();
        let items = loop_state
            .get("items")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let index = loop_state.get("index").and_then(Value::as_u64).unwrap_or(0) as usize;

        if let Some(results) = loop_state.get_mut("results").and_then(Value::as_array_mut) {
            results.push(result);
        }

        let next_index = index + 1;
        if next_index < items.len() {
            loop_state["index"] = json!(next_index);
            loop_state["current_item"] = items[next_index].clone();
            state.loop_state = loop_state;
            exec_repo::save_state(&self.pool, execution.execution_id, &serialize_state(state))
                .await?;

            for body_entry in topology.loop_bodies.get(loop_id).into_iter().flatten() {
                self.queue
                    .enqueue(Job::ExecuteNodeJob {
                        execution_id: execution.execution_id,
                        node_id: body_entry.clone(),
                        retry_count: 0,
                    })
                    .await?;
            }
            return Ok(());
        }

        // Loop drained: record results on the loop node and continue along
        // its direct successors.
        loop_state["active"] = json!(false);
        let results = loop_state.get("results").cloned().unwrap_or(json!([]));
        state.loop_state = loop_state;
        state
            .node_outputs
            .insert(loop_id.to_string(), json!({"results": results}));
        exec_repo::save_state(&self.pool, execution.execution_id, &serialize_state(state))
            .await?;

        let delta = StateDelta::default();
        Box::pin(self.select_next(execution, workflow, topology, loop_id, state, &delta))
            .await
    }

    // -----------------------------------------------------------------------
    // Interrupts
    // -----------------------------------------------------------------------

    /// interrupt_before on a human-facing node: park the execution behind a
    /// confirmation ticket.
    async fn interrupt_for_human(
        &self,
        execution: &WorkflowExecutionRow,
        node_id: &str,
        spec: &components::ComponentSpec,
        retry_count: i32,
    ) -> Result<(), EngineError> {
        let prompt = spec
            .config
            .extra
            .get("prompt")
            .and_then(Value::as_str)
            .unwrap_or(components::human_confirmation::DEFAULT_PROMPT)
            .to_string();

        let task_id: String = {
            let mut rng = rand::thread_rng();
            (0..8)
                .map(|_| format!("{:x}", rng.gen_range(0..16)))
                .collect()
        };

        // Confirmation tickets are for human-facing nodes; agent tool
        // interrupts only get the suspend event.
        if spec.component_type == "human_confirmation" {
            let chat_id = execution
                .trigger_payload
                .as_ref()
                .and_then(|p| p.get("chat_id"))
                .and_then(Value::as_i64)
                .unwrap_or(0);
            let expires_at =
                Utc::now() + ChronoDuration::seconds(self.config.pending_task_ttl_seconds);

            tasks_repo::create_pending_task(
                &self.pool,
                &task_id,
                execution.execution_id,
                execution.user_profile_id,
                chat_id,
                node_id,
                &prompt,
                expires_at,
            )
            .await?;
        }

        let wait_state = WaitState::Human {
            node_id: node_id.to_string(),
        };
        exec_repo::save_wait_state(
            &self.pool,
            execution.execution_id,
            Some(&serde_json::to_value(&wait_state).expect("wait state serialises")),
        )
        .await?;
        exec_repo::update_execution_status(
            &self.pool,
            execution.execution_id,
            ExecutionStatus::Interrupted,
        )
        .await?;

        logs_repo::insert_log(
            &self.pool,
            &logs_repo::NewLog {
                execution_id: execution.execution_id,
                node_id: node_id.to_string(),
                status: LogStatus::Interrupted,
                input: None,
                output: Some(json!({"prompt": prompt, "task_id": task_id})),
                error: String::new(),
                error_code: None,
                metadata: None,
                retry_count,
                duration_ms: 0,
            },
        )
        .await?;

        self.publish(
            execution,
            EventType::NodeStatus,
            json!({"node_id": node_id, "status": "interrupted", "task_id": task_id}),
        );
        info!(node_id, task_id, "execution interrupted for confirmation");
        Ok(())
    }

    /// A component raised a spawn/sub-workflow interrupt mid-run.
    #[allow(clippy::too_many_arguments)]
    async fn handle_interrupt(
        &self,
        execution: &WorkflowExecutionRow,
        workflow: &WorkflowRow,
        node_id: &str,
        retry_count: i32,
        mut state: WorkflowState,
        delta: StateDelta,
        interrupt: InterruptPayload,
        duration_ms: i64,
    ) -> Result<(), EngineError> {
        // Keep the messages/usage the component produced before suspending.
        let usage = delta.token_usage;
        merge_state(&mut state, &delta);
        exec_repo::save_state(&self.pool, execution.execution_id, &serialize_state(&state))
            .await?;
        if let Some(usage) = usage {
            exec_repo::add_usage(
                &self.pool,
                execution.execution_id,
                usage.input_tokens,
                usage.output_tokens,
                usage.cost_usd,
                usage.llm_calls,
                usage.tool_invocations,
            )
            .await?;
        }

        logs_repo::insert_log(
            &self.pool,
            &logs_repo::NewLog {
                execution_id: execution.execution_id,
                node_id: node_id.to_string(),
                status: LogStatus::Interrupted,
                input: None,
                output: Some(json!({"interrupt": serde_json::to_value(&interrupt).unwrap_or(Value::Null)})),
                error: String::new(),
                error_code: None,
                metadata: None,
                retry_count,
                duration_ms,
            },
        )
        .await?;

        spawn::launch_children(self, execution, workflow, node_id, interrupt).await?;

        self.publish(
            execution,
            EventType::NodeStatus,
            json!({"node_id": node_id, "status": "interrupted"}),
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Failure path
    // -----------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    async fn handle_failure(
        &self,
        execution: &WorkflowExecutionRow,
        workflow: &WorkflowRow,
        topology: &Topology,
        node_id: &str,
        retry_count: i32,
        mut state: WorkflowState,
        err: ComponentError,
        duration_ms: i64,
    ) -> Result<(), EngineError> {
        let max_retries = self.node_max_retries(topology, node_id, execution).await;

        logs_repo::insert_log(
            &self.pool,
            &logs_repo::NewLog {
                execution_id: execution.execution_id,
                node_id: node_id.to_string(),
                status: LogStatus::Failed,
                input: None,
                output: None,
                error: err.message().to_string(),
                error_code: Some(err.code().as_str().to_string()),
                metadata: None,
                retry_count,
                duration_ms,
            },
        )
        .await?;
        self.publish(
            execution,
            EventType::NodeStatus,
            json!({
                "node_id": node_id,
                "status": "failed",
                "retry_count": retry_count,
                "error_code": err.code().as_str(),
            }),
        );

        if err.is_retryable() && retry_count < max_retries {
            let delay = (self.config.retry_base_seconds * 2f64.powi(retry_count))
                .min(self.config.retry_cap_seconds);
            warn!(
                node_id,
                retry_count,
                delay_seconds = delay,
                "retryable node failure: {}",
                err.message()
            );
            self.queue
                .enqueue_in(
                    Job::ExecuteNodeJob {
                        execution_id: execution.execution_id,
                        node_id: node_id.to_string(),
                        retry_count: retry_count + 1,
                    },
                    delay,
                )
                .await?;
            return Ok(());
        }

        // Parallel-iteration policy: a failed body node ends its iteration
        // with an error marker instead of failing the whole loop.
        if let Some(loop_id) = topology.loop_containing(node_id) {
            if spawn::loop_is_active(&state, loop_id) {
                warn!(node_id, loop_id, "loop iteration failed; continuing");
                let loop_id = loop_id.to_string();
                return self
                    .advance_loop_with_result(
                        execution,
                        workflow,
                        topology,
                        &loop_id,
                        json!({"_error": err.message()}),
                        &mut state,
                    )
                    .await;
            }
        }

        self.fail_with(
            execution,
            workflow,
            node_id,
            retry_count,
            err.code(),
            err.message(),
        )
        .await
    }

    /// Per-node retry limit: component config wins, then execution row.
    async fn node_max_retries(
        &self,
        topology: &Topology,
        node_id: &str,
        execution: &WorkflowExecutionRow,
    ) -> i32 {
        if let Some(node) = topology.nodes.get(node_id) {
            if let Ok(config) =
                nodes_repo::get_component_config(&self.pool, node.component_config_id).await
            {
                if let Some(max_retries) = config.max_retries {
                    return max_retries;
                }
            }
        }
        if execution.max_retries > 0 {
            execution.max_retries
        } else {
            self.config.default_max_retries
        }
    }

    /// Terminal failure: mark the execution failed, emit events, fire the
    /// error-handler workflow, and notify any waiting parent.
    async fn fail_with(
        &self,
        execution: &WorkflowExecutionRow,
        workflow: &WorkflowRow,
        node_id: &str,
        _retry_count: i32,
        code: ErrorCode,
        message: &str,
    ) -> Result<(), EngineError> {
        error!(node_id, code = code.as_str(), "execution failed: {message}");
        exec_repo::fail_execution(&self.pool, execution.execution_id, message).await?;

        let summary = activity_summary(&self.pool, execution.execution_id).await?;
        self.publish(
            execution,
            EventType::ExecutionFailed,
            json!({
                "node_id": node_id,
                "error": message,
                "error_code": code.as_str(),
                "activity": summary,
            }),
        );

        if let Some(handler_id) = workflow.error_handler_workflow_id {
            self.fire_error_handler(workflow, handler_id, execution, node_id, message)
                .await;
        }

        spawn::notify_parent_if_child(self, execution.execution_id).await
    }

    /// Fire the configured error-handler workflow with the error payload.
    /// Best-effort: a broken handler never masks the original failure.
    async fn fire_error_handler(
        &self,
        workflow: &WorkflowRow,
        handler_id: i64,
        execution: &WorkflowExecutionRow,
        node_id: &str,
        message: &str,
    ) {
        let payload = json!({
            "error": message,
            "source_workflow": workflow.slug,
            "failed_node_id": node_id,
            "failed_execution_id": execution.execution_id,
        });
        let result = crate::triggers::dispatch_to_workflow(
            &self.pool,
            &self.queue,
            handler_id,
            "trigger_error",
            payload,
            execution.user_profile_id,
        )
        .await;
        if let Err(err) = result {
            warn!("error handler dispatch failed: {err}");
        }
    }

    // -----------------------------------------------------------------------
    // resume
    // -----------------------------------------------------------------------

    /// Resume an interrupted execution with external input.
    #[instrument(skip(self, user_input), fields(execution_id = %execution_id))]
    pub async fn resume_workflow_job(
        &self,
        execution_id: Uuid,
        user_input: Value,
    ) -> Result<(), EngineError> {
        let execution = exec_repo::get_execution(&self.pool, execution_id).await?;
        if execution.status() != ExecutionStatus::Interrupted {
            warn!("resume on non-interrupted execution ignored");
            return Ok(());
        }
        let Some(wait_state) = execution
            .wait_state
            .as_ref()
            .and_then(|v| serde_json::from_value::<WaitState>(v.clone()).ok())
        else {
            warn!("interrupted execution has no wait state; ignoring resume");
            return Ok(());
        };

        tasks_repo::delete_for_execution(&self.pool, execution_id).await?;

        let node_id = wait_state.node_id().to_string();
        let mut state = self.load_state(&execution)?;
        exec_repo::save_wait_state(&self.pool, execution_id, None).await?;
        exec_repo::update_execution_status(&self.pool, execution_id, ExecutionStatus::Running)
            .await?;

        // An after-node hold does not re-run the node; it proceeds straight
        // to the successors.
        if matches!(wait_state, WaitState::After { .. }) {
            let workflow = workflows_repo::get_workflow(&self.pool, execution.workflow_id).await?;
            let topology = cached_topology(
                &self.pool,
                &self.cache,
                &workflow,
                execution.trigger_node_id,
            )
            .await?;
            return self
                .select_next(
                    &execution,
                    &workflow,
                    &topology,
                    &node_id,
                    &state,
                    &StateDelta::default(),
                )
                .await;
        }

        state.resume_input = Some(user_input);
        exec_repo::save_state(&self.pool, execution_id, &serialize_state(&state)).await?;

        self.queue
            .enqueue(Job::ExecuteNodeJob {
                execution_id,
                node_id,
                retry_count: 0,
            })
            .await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Cancellation
    // -----------------------------------------------------------------------

    /// Cancel an execution and cascade to all non-terminal children.
    pub async fn cancel_execution(&self, execution_id: Uuid) -> Result<(), EngineError> {
        let mut pending = std::collections::VecDeque::from([execution_id]);
        while let Some(current) = pending.pop_front() {
            let execution = match exec_repo::get_execution(&self.pool, current).await {
                Ok(execution) => execution,
                Err(db::DbError::NotFound) => continue,
                Err(err) => return Err(err.into()),
            };
            if execution.status().is_terminal() {
                continue;
            }
            exec_repo::update_execution_status(&self.pool, current, ExecutionStatus::Cancelled)
                .await?;
            tasks_repo::delete_for_execution(&self.pool, current).await?;
            self.publish(&execution, EventType::ExecutionFailed, json!({"cancelled": true}));

            for child in exec_repo::list_children(&self.pool, current).await? {
                if !child.status().is_terminal() {
                    pending.push_back(child.execution_id);
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    pub(crate) fn load_state(
        &self,
        execution: &WorkflowExecutionRow,
    ) -> Result<WorkflowState, EngineError> {
        match &execution.state {
            Some(raw) => deserialize_state(raw)
                .map_err(|e| EngineError::State(format!("execution state: {e}"))),
            None => Ok(WorkflowState::initial(
                execution.execution_id.to_string(),
                execution.trigger_payload.clone().unwrap_or(json!({})),
            )),
        }
    }

    async fn predecessors_terminal(
        &self,
        execution: &WorkflowExecutionRow,
        topology: &Topology,
        node_id: &str,
    ) -> Result<bool, EngineError> {
        let preds: Vec<&str> = topology
            .edges
            .iter()
            .filter(|e| {
                e.target_node_id == node_id
                    && e.edge_label != "loop_return"
                    && e.edge_label != "loop_body"
            })
            .map(|e| e.source_node_id.as_str())
            .collect();
        if preds.is_empty() {
            return Ok(true);
        }

        let latest = logs_repo::latest_logs_by_node(&self.pool, execution.execution_id).await?;
        // Conditional sources count as satisfied when they routed anywhere;
        // a join waits only on predecessors that can still run.
        Ok(preds.iter().all(|pred| {
            latest
                .iter()
                .any(|log| log.node_id == *pred && log.status().is_terminal())
                || !self.predecessor_can_still_run(topology, execution, pred, &latest)
        }))
    }

    /// A predecessor that lost a conditional route will never produce a
    /// log; joins must not wait on it forever.
    fn predecessor_can_still_run(
        &self,
        topology: &Topology,
        _execution: &WorkflowExecutionRow,
        pred: &str,
        latest: &[db::models::ExecutionLogRow],
    ) -> bool {
        // A node that has run (any log) is settled either way.
        if latest.iter().any(|log| log.node_id == pred) {
            return false;
        }
        // Entry nodes always run eventually.
        if topology.entry_node_ids.iter().any(|e| e == pred) {
            return true;
        }
        // Otherwise: it can run iff one of ITS predecessors can still reach
        // it. One level is enough for routing fan-ins in practice.
        topology
            .edges
            .iter()
            .filter(|e| e.target_node_id == pred && e.edge_label.is_empty())
            .any(|e| {
                latest
                    .iter()
                    .all(|log| log.node_id != e.source_node_id)
                    || latest.iter().any(|log| {
                        log.node_id == e.source_node_id && !log.status().is_terminal()
                    })
            })
    }

    pub(crate) fn publish(&self, execution: &WorkflowExecutionRow, event_type: EventType, data: Value) {
        self.services.broadcaster.publish(Event::new(
            event_type,
            execution_channel(&execution.execution_id.to_string()),
            data,
        ));
    }

    fn publish_state(&self, execution: &WorkflowExecutionRow, state: &WorkflowState) {
        self.publish(
            execution,
            EventType::ExecutionState,
            json!({
                "route": state.route,
                "current_node": state.current_node,
                "node_outputs": state.node_outputs.keys().collect::<Vec<_>>(),
                "output": state.output,
            }),
        );
    }
}

// ---------------------------------------------------------------------------
// Routing (pure)
// ---------------------------------------------------------------------------

/// Resolve a node's successors from its outgoing control-flow edges and
/// the current route. An empty result means the branch terminates at END.
///
/// Conditional edges build a path map from per-edge `condition_value`
/// (preferred) or the legacy `condition_mapping` on the first edge; the
/// route selects one target. Direct edges fan out to every distinct
/// target. `__end__` and empty targets terminate.
pub(crate) fn route_targets(
    outgoing: &[&crate::topology::EdgeInfo],
    route: &str,
) -> Vec<String> {
    let conditional: Vec<_> = outgoing
        .iter()
        .filter(|e| e.edge_type == "conditional")
        .collect();
    let direct: Vec<_> = outgoing
        .iter()
        .filter(|e| e.edge_type == "direct")
        .collect();

    if !conditional.is_empty() {
        let mut path_map: Vec<(String, String)> = conditional
            .iter()
            .filter(|e| !e.condition_value.is_empty())
            .map(|e| (e.condition_value.clone(), e.target_node_id.clone()))
            .collect();
        if path_map.is_empty() {
            if let Some(mapping) = conditional[0]
                .condition_mapping
                .as_ref()
                .and_then(Value::as_object)
            {
                path_map = mapping
                    .iter()
                    .filter_map(|(value, target)| {
                        target.as_str().map(|t| (value.clone(), t.to_string()))
                    })
                    .collect();
            }
        }
        return match path_map.iter().find(|(value, _)| value.as_str() == route) {
            Some((_, target)) if target != "__end__" && !target.is_empty() => {
                vec![target.clone()]
            }
            _ => Vec::new(),
        };
    }

    let mut targets: Vec<String> = Vec::new();
    for edge in &direct {
        if edge.target_node_id.is_empty() || edge.target_node_id == "__end__" {
            continue;
        }
        if !targets.contains(&edge.target_node_id) {
            targets.push(edge.target_node_id.clone());
        }
    }
    targets
}
