//! Component-level error type and the error-code taxonomy.

use thiserror::Error;

/// Stable error codes surfaced on execution logs and terminal events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "VALIDATION_ERROR")]
    Validation,
    #[serde(rename = "NODE_TIMEOUT")]
    NodeTimeout,
    #[serde(rename = "SUBPROCESS_TIMEOUT")]
    SubprocessTimeout,
    #[serde(rename = "SECURITY_VIOLATION")]
    SecurityViolation,
    #[serde(rename = "PROVIDER_ERROR")]
    ProviderError,
    #[serde(rename = "CHILD_FAILED")]
    ChildFailed,
    #[serde(rename = "ZOMBIE")]
    Zombie,
    #[serde(rename = "EXECUTION_ERROR")]
    ExecutionError,
    #[serde(rename = "UNRECOVERABLE")]
    Unrecoverable,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION_ERROR",
            Self::NodeTimeout => "NODE_TIMEOUT",
            Self::SubprocessTimeout => "SUBPROCESS_TIMEOUT",
            Self::SecurityViolation => "SECURITY_VIOLATION",
            Self::ProviderError => "PROVIDER_ERROR",
            Self::ChildFailed => "CHILD_FAILED",
            Self::Zombie => "ZOMBIE",
            Self::ExecutionError => "EXECUTION_ERROR",
            Self::Unrecoverable => "UNRECOVERABLE",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by a component's `run` method.
///
/// The orchestrator uses the variant to decide retry behaviour:
/// - `Retryable` — the node job is re-queued with exponential back-off.
/// - `Fatal`     — the attempt fails immediately, no retry.
#[derive(Debug, Error, Clone)]
pub enum ComponentError {
    /// Transient failure (network, timeout, 5xx); retry with back-off.
    #[error("retryable component error [{code}]: {message}")]
    Retryable { code: ErrorCode, message: String },

    /// Permanent failure (schema violation, security); no retry.
    #[error("fatal component error [{code}]: {message}")]
    Fatal { code: ErrorCode, message: String },
}

impl ComponentError {
    pub fn retryable(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Retryable {
            code,
            message: message.into(),
        }
    }

    pub fn fatal(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Fatal {
            code,
            message: message.into(),
        }
    }

    /// Convenience for provider failures, which are transient by default.
    pub fn provider(message: impl Into<String>) -> Self {
        Self::retryable(ErrorCode::ProviderError, message)
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Retryable { code, .. } | Self::Fatal { code, .. } => *code,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Retryable { message, .. } | Self::Fatal { message, .. } => message,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable { .. })
    }
}
