//! `MockComponent` — a test double for `Component`.
//!
//! Useful in unit and integration tests where a real component
//! implementation is either unavailable or irrelevant.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{ComponentError, ErrorCode};
use crate::state::{StateDelta, WorkflowState};
use crate::traits::{Component, ComponentContext};

/// Behaviour injected into `MockComponent` at construction time.
pub enum MockBehaviour {
    /// Return a specific delta.
    ReturnDelta(StateDelta),
    /// Fail with a retryable error.
    FailRetryable(String),
    /// Fail with a fatal error.
    FailFatal(String),
    /// Fail retryably for the first N calls, then return the delta.
    FailThenSucceed(usize, StateDelta),
}

/// A mock component that records every call it receives and returns a
/// programmer-specified result.
pub struct MockComponent {
    /// Label used in test assertions.
    pub name: String,
    pub behaviour: MockBehaviour,
    /// Snapshots of every state seen by this component (in call order).
    pub calls: Arc<Mutex<Vec<WorkflowState>>>,
}

impl MockComponent {
    pub fn returning(name: impl Into<String>, delta: StateDelta) -> Self {
        Self {
            name: name.into(),
            behaviour: MockBehaviour::ReturnDelta(delta),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing_fatal(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            behaviour: MockBehaviour::FailFatal(msg.into()),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing_retryable(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            behaviour: MockBehaviour::FailRetryable(msg.into()),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn flaky(name: impl Into<String>, failures: usize, delta: StateDelta) -> Self {
        Self {
            name: name.into(),
            behaviour: MockBehaviour::FailThenSucceed(failures, delta),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Number of times this component has been executed.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Component for MockComponent {
    async fn run(
        &self,
        state: &WorkflowState,
        _ctx: &ComponentContext,
    ) -> Result<StateDelta, ComponentError> {
        let call_index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(state.clone());
            calls.len()
        };

        match &self.behaviour {
            MockBehaviour::ReturnDelta(delta) => Ok(delta.clone()),
            MockBehaviour::FailRetryable(msg) => Err(ComponentError::retryable(
                ErrorCode::ExecutionError,
                msg.clone(),
            )),
            MockBehaviour::FailFatal(msg) => {
                Err(ComponentError::fatal(ErrorCode::Unrecoverable, msg.clone()))
            }
            MockBehaviour::FailThenSucceed(failures, delta) => {
                if call_index <= *failures {
                    Err(ComponentError::retryable(
                        ErrorCode::ExecutionError,
                        format!("transient failure {call_index}"),
                    ))
                } else {
                    Ok(delta.clone())
                }
            }
        }
    }
}
