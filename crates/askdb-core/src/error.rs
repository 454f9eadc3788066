//! Error taxonomy for the request pipeline, the Context Store and the Tool Registry.

use crate::guard::SecurityAlert;

/// Failure of a single turn. Each variant maps to a distinct user-facing outcome.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Expected, user-correctable: a security gate rejected the input or generated SQL.
    #[error("request blocked by {} check", .alert.alert_type)]
    ValidationBlocked { alert: SecurityAlert },

    /// External collaborator (translator, executor, exporter) failed.
    #[error("{stage} failed: {message}")]
    ExecutionFailed { stage: &'static str, message: String },

    /// External collaborator did not answer within the caller-supplied bound.
    #[error("{stage} timed out after {}ms", .timeout.as_millis())]
    Timeout {
        stage: &'static str,
        timeout: std::time::Duration,
    },

    /// Programming or configuration error (missing API key, registry misuse).
    #[error("internal fault: {0}")]
    InternalFault(String),
}

impl PipelineError {
    pub fn execution(stage: &'static str, message: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            stage,
            message: message.into(),
        }
    }

    /// Human-readable text safe to show the caller. Never includes matched patterns.
    pub fn user_message(&self) -> String {
        match self {
            Self::ValidationBlocked { alert } => alert.user_message().to_string(),
            Self::ExecutionFailed { stage, message } => {
                format!("Sorry, the {} step failed: {}", stage, message)
            }
            Self::Timeout { stage, .. } => {
                format!("Sorry, the {} step took too long to respond. Please try again.", stage)
            }
            Self::InternalFault(_) => {
                "Sorry, the service is misconfigured and could not process this request.".to_string()
            }
        }
    }
}

/// Context Store failures.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    /// The per-user update lock was not acquired within the bounded wait. Retryable.
    #[error("timed out waiting for the context lock of user '{user_id}'")]
    LockTimeout { user_id: String },

    #[error("context storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("context serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ContextError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout { .. })
    }
}

/// Tool Registry misuse.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("tool '{0}' is already registered")]
    Duplicate(String),

    #[error("unknown tool: {0}")]
    NotFound(String),
}

/// Failure returned by a tool handler (or by the registry lookup in front of it).
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Context(#[from] ContextError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::{AlertType, Severity};

    #[test]
    fn lock_timeout_is_retryable() {
        let err = ContextError::LockTimeout {
            user_id: "u1".into(),
        };
        assert!(err.is_retryable());
        assert!(err.to_string().contains("u1"));
    }

    #[test]
    fn blocked_user_message_does_not_leak_details() {
        let err = PipelineError::ValidationBlocked {
            alert: SecurityAlert::new(
                AlertType::InputValidation,
                Severity::High,
                "matched injection rule nl.comment_termination",
            ),
        };
        assert_eq!(err.to_string(), "request blocked by input_validation check");
        assert!(!err.user_message().contains("comment_termination"));
    }
}
