//! Shell command component — runs one command through the bash sandbox.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::code_execute::{check_security, run_sandboxed};
use crate::error::ComponentError;
use crate::state::{StateDelta, WorkflowState};
use crate::traits::{Component, ComponentContext, ComponentSpec};

pub struct RunCommand {
    node_id: String,
    command: String,
    timeout_seconds: u64,
}

impl RunCommand {
    pub fn from_spec(spec: &ComponentSpec) -> Self {
        let extra = &spec.config.extra;
        Self {
            node_id: spec.node_id.clone(),
            command: extra
                .get("command")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string(),
            timeout_seconds: extra
                .get("timeout_seconds")
                .and_then(Value::as_u64)
                .unwrap_or(60),
        }
    }
}

/// Run a single shell command under the sandbox rules; shared with the
/// agent's `run_command` tool.
pub async fn run_shell_command(
    command: &str,
    timeout_seconds: u64,
) -> Result<Value, ComponentError> {
    if command.trim().is_empty() {
        return Ok(json!({
            "stdout": "",
            "stderr": "No command provided",
            "exit_code": -1,
            "error": "EMPTY_COMMAND",
        }));
    }
    if let Err(err) = check_security(command, "bash") {
        return Ok(json!({
            "stdout": "",
            "stderr": err.message(),
            "exit_code": -1,
            "error": "SECURITY_VIOLATION",
        }));
    }

    let outcome = run_sandboxed(command, "bash", timeout_seconds, true).await?;
    let mut output = json!({
        "stdout": outcome.stdout,
        "stderr": outcome.stderr,
        "exit_code": outcome.exit_code,
    });
    if outcome.exit_code != 0 {
        output["error"] = json!("EXECUTION_ERROR");
    }
    Ok(output)
}

#[async_trait]
impl Component for RunCommand {
    async fn run(
        &self,
        _state: &WorkflowState,
        _ctx: &ComponentContext,
    ) -> Result<StateDelta, ComponentError> {
        let output = run_shell_command(&self.command, self.timeout_seconds).await?;
        Ok(StateDelta::with_node_output(&self.node_id, output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_command_reports_cleanly() {
        let output = run_shell_command("", 5).await.unwrap();
        assert_eq!(output["error"], json!("EMPTY_COMMAND"));
    }

    #[tokio::test]
    async fn destructive_command_is_blocked() {
        let output = run_shell_command("rm -rf /", 5).await.unwrap();
        assert_eq!(output["error"], json!("SECURITY_VIOLATION"));
    }
}
