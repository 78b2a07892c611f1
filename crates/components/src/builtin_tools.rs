//! In-process tool execution: calculator, datetime, web search, plus the
//! dispatch shared by the agent for every builtin tool name.

use chrono::Utc;
use serde_json::{json, Value};

use crate::code_execute::{check_security, run_sandboxed};
use crate::error::{ComponentError, ErrorCode};
use crate::http_request::perform_request;
use crate::run_command::run_shell_command;
use crate::traits::ComponentContext;

// ---------------------------------------------------------------------------
// calculator
// ---------------------------------------------------------------------------

/// Evaluate a math expression. Supports `+, -, *, /, //, %, **` (and `^`)
/// with parentheses.
///
/// Python-style spellings are normalised to evalexpr's before evaluation:
/// `**` becomes `^`, and `//` maps onto `/`, which evalexpr already
/// evaluates integrally when both operands are integers.
pub fn evaluate_arithmetic(expression: &str) -> Result<f64, ComponentError> {
    if expression.trim().is_empty() {
        return Err(invalid_expr(expression, "empty expression"));
    }
    let normalized = expression.replace("**", "^").replace("//", "/");

    let value = evalexpr::eval(&normalized)
        .map_err(|e| invalid_expr(expression, &e.to_string()))?;
    let number = value
        .as_number()
        .map_err(|_| invalid_expr(expression, "result is not a number"))?;
    if number.is_finite() {
        Ok(number)
    } else {
        Err(ComponentError::fatal(
            ErrorCode::ExecutionError,
            "expression did not evaluate to a finite number",
        ))
    }
}

fn invalid_expr(expression: &str, reason: &str) -> ComponentError {
    ComponentError::fatal(
        ErrorCode::Validation,
        format!("invalid arithmetic expression '{expression}': {reason}"),
    )
}

// ---------------------------------------------------------------------------
// web search
// ---------------------------------------------------------------------------

/// Search via a DuckDuckGo-compatible instant-answer endpoint. Results are
/// best-effort snippets; an unreachable endpoint is a retryable failure.
pub async fn web_search(http: &reqwest::Client, query: &str) -> Result<Value, ComponentError> {
    if query.trim().is_empty() {
        return Err(ComponentError::fatal(
            ErrorCode::Validation,
            "web_search requires a query",
        ));
    }
    let response = http
        .get("https://api.duckduckgo.com/")
        .query(&[("q", query), ("format", "json"), ("no_html", "1")])
        .send()
        .await
        .map_err(|e| ComponentError::retryable(ErrorCode::ExecutionError, format!("search failed: {e}")))?;
    let body: Value = response.json().await.map_err(|e| {
        ComponentError::retryable(ErrorCode::ExecutionError, format!("search parse failed: {e}"))
    })?;

    let mut results = Vec::new();
    if let Some(abstract_text) = body.get("AbstractText").and_then(Value::as_str) {
        if !abstract_text.is_empty() {
            results.push(json!({"title": body.get("Heading"), "snippet": abstract_text}));
        }
    }
    if let Some(related) = body.get("RelatedTopics").and_then(Value::as_array) {
        for topic in related.iter().take(5) {
            if let Some(text) = topic.get("Text").and_then(Value::as_str) {
                results.push(json!({"snippet": text, "url": topic.get("FirstURL")}));
            }
        }
    }
    Ok(json!({"query": query, "results": results}))
}

// ---------------------------------------------------------------------------
// dispatch
// ---------------------------------------------------------------------------

/// Execute a builtin tool by name. The agent routes every
/// `ToolKind::Builtin` call through here.
pub async fn execute_builtin_tool(
    name: &str,
    arguments: &Value,
    ctx: &ComponentContext,
) -> Result<Value, ComponentError> {
    match name {
        "calculator" => {
            let expression = arguments
                .get("expression")
                .and_then(Value::as_str)
                .unwrap_or("");
            let result = evaluate_arithmetic(expression)?;
            Ok(json!({"expression": expression, "result": result}))
        }
        "datetime_now" => Ok(json!({
            "iso": Utc::now().to_rfc3339(),
            "unix": Utc::now().timestamp(),
        })),
        "web_search" => {
            let query = arguments.get("query").and_then(Value::as_str).unwrap_or("");
            web_search(&ctx.http, query).await
        }
        "http_request" => {
            perform_request(
                &ctx.http,
                arguments.get("url").and_then(Value::as_str).unwrap_or(""),
                arguments
                    .get("method")
                    .and_then(Value::as_str)
                    .unwrap_or("GET"),
                arguments.get("headers").unwrap_or(&json!({})),
                arguments.get("body"),
                30,
            )
            .await
        }
        "run_command" => {
            let command = arguments
                .get("command")
                .and_then(Value::as_str)
                .unwrap_or("");
            run_shell_command(command, 60).await
        }
        "execute_code" => {
            let code = arguments.get("code").and_then(Value::as_str).unwrap_or("");
            let language = arguments
                .get("language")
                .and_then(Value::as_str)
                .unwrap_or("python");
            if language != "python" && language != "bash" {
                return Err(ComponentError::fatal(
                    ErrorCode::Validation,
                    format!("unsupported language '{language}'"),
                ));
            }
            check_security(code, language)?;
            let outcome = run_sandboxed(code, language, 30, true).await?;
            Ok(json!({
                "stdout": outcome.stdout,
                "stderr": outcome.stderr,
                "exit_code": outcome.exit_code,
                "result": outcome.result,
            }))
        }
        other => Err(ComponentError::fatal(
            ErrorCode::Unrecoverable,
            format!("unknown builtin tool '{other}'"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic_respects_precedence_and_parens() {
        assert_eq!(evaluate_arithmetic("2+3*4").unwrap(), 14.0);
        assert_eq!(evaluate_arithmetic("(2+3)*4").unwrap(), 20.0);
        assert_eq!(evaluate_arithmetic("-3 + 5").unwrap(), 2.0);
        // Integer operands divide integrally; floats divide exactly.
        assert_eq!(evaluate_arithmetic("10 / 4.0").unwrap(), 2.5);
    }

    #[test]
    fn python_style_operators_are_supported() {
        assert_eq!(evaluate_arithmetic("2 ** 3").unwrap(), 8.0);
        assert_eq!(evaluate_arithmetic("2^3").unwrap(), 8.0);
        assert_eq!(evaluate_arithmetic("17 % 5").unwrap(), 2.0);
        assert_eq!(evaluate_arithmetic("7 // 2").unwrap(), 3.0);
        assert_eq!(evaluate_arithmetic("1 + 8 // 3 * 2").unwrap(), 5.0);
    }

    #[test]
    fn malformed_expressions_are_rejected() {
        assert!(evaluate_arithmetic("2 +").is_err());
        assert!(evaluate_arithmetic("(1+2").is_err());
        assert!(evaluate_arithmetic("abc").is_err());
        assert!(evaluate_arithmetic("").is_err());
        assert!(evaluate_arithmetic("1/0").is_err());
        assert!(evaluate_arithmetic("1.0/0.0").is_err()); // infinity is not a result
    }

    #[tokio::test]
    async fn calculator_tool_dispatch() {
        let ctx = ComponentContext::for_tests_no_llm();
        let out = execute_builtin_tool("calculator", &json!({"expression": "6*7"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out["result"], json!(42.0));
    }

    #[tokio::test]
    async fn unknown_tool_is_fatal() {
        let ctx = ComponentContext::for_tests_no_llm();
        let err = execute_builtin_tool("nope", &json!({}), &ctx)
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }
}
