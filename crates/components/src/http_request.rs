//! HTTP request component.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{ComponentError, ErrorCode};
use crate::state::{StateDelta, WorkflowState};
use crate::traits::{Component, ComponentContext, ComponentSpec};

pub struct HttpRequest {
    node_id: String,
    url: String,
    method: String,
    headers: Value,
    body: Option<Value>,
    timeout_seconds: u64,
}

impl HttpRequest {
    pub fn from_spec(spec: &ComponentSpec) -> Self {
        let extra = &spec.config.extra;
        Self {
            node_id: spec.node_id.clone(),
            url: extra
                .get("url")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string(),
            method: extra
                .get("method")
                .and_then(Value::as_str)
                .unwrap_or("GET")
                .to_uppercase(),
            headers: extra.get("headers").cloned().unwrap_or_else(|| json!({})),
            body: extra.get("body").cloned(),
            timeout_seconds: extra
                .get("timeout_seconds")
                .and_then(Value::as_u64)
                .unwrap_or(30),
        }
    }
}

/// Shared request runner, also used when the agent calls the
/// `http_request` tool.
pub async fn perform_request(
    http: &reqwest::Client,
    url: &str,
    method: &str,
    headers: &Value,
    body: Option<&Value>,
    timeout_seconds: u64,
) -> Result<Value, ComponentError> {
    if url.is_empty() {
        return Err(ComponentError::fatal(
            ErrorCode::Validation,
            "http_request requires a url",
        ));
    }

    let method: reqwest::Method = method.parse().map_err(|_| {
        ComponentError::fatal(ErrorCode::Validation, format!("invalid method '{method}'"))
    })?;

    let mut request = http
        .request(method, url)
        .timeout(Duration::from_secs(timeout_seconds));
    if let Some(headers) = headers.as_object() {
        for (name, value) in headers {
            if let Some(value) = value.as_str() {
                request = request.header(name, value);
            }
        }
    }
    if let Some(body) = body {
        request = request.json(body);
    }

    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            ComponentError::retryable(ErrorCode::NodeTimeout, format!("request timed out: {e}"))
        } else {
            ComponentError::retryable(ErrorCode::ExecutionError, format!("request failed: {e}"))
        }
    })?;

    let status = response.status().as_u16();
    let text = response.text().await.unwrap_or_default();
    let parsed: Value = serde_json::from_str(&text).unwrap_or(Value::Null);

    Ok(json!({
        "status": status,
        "body": text,
        "json": parsed,
    }))
}

#[async_trait]
impl Component for HttpRequest {
    async fn run(
        &self,
        _state: &WorkflowState,
        ctx: &ComponentContext,
    ) -> Result<StateDelta, ComponentError> {
        let output = perform_request(
            &ctx.http,
            &self.url,
            &self.method,
            &self.headers,
            self.body.as_ref(),
            self.timeout_seconds,
        )
        .await?;
        Ok(StateDelta::with_node_output(&self.node_id, output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_url_is_a_validation_error() {
        let err = perform_request(
            &reqwest::Client::new(),
            "",
            "GET",
            &json!({}),
            None,
            5,
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Validation);
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn invalid_method_is_a_validation_error() {
        let err = perform_request(
            &reqwest::Client::new(),
            "http://localhost:1/never",
            "NOT A METHOD",
            &json!({}),
            None,
            5,
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Validation);
    }
}
