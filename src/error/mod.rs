//! Error types for Drummer.

use serde::{Deserialize, Serialize};
use strum::Display;
use thiserror::Error;

use crate::run::RunId;

/// Primary error type for all Drummer operations.
#[derive(Error, Debug)]
pub enum DrummerError {
    #[error("Run {run_id} was cancelled")]
    Cancelled { run_id: RunId },

    #[error("Input validation failed: {0}")]
    InputValidation(String),

    #[error("Output validation failed: {0}")]
    OutputValidation(String),

    #[error("Operation cancelled by user")]
    Interrupted,

    #[error("Model error: {0}")]
    Model(String),

    #[error("Tool execution error: {tool_name}: {message}")]
    ToolExecution { tool_name: String, message: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Approval error: {0}")]
    Approval(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Coarse error classification carried on error events and used by the retry
/// policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorCategory {
    Cancelled,
    InputValidation,
    OutputValidation,
    Interrupted,
    Model,
    ToolExecution,
    Storage,
    Approval,
    Serialization,
    Io,
    InvalidArgument,
    InvalidState,
}

impl DrummerError {
    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Cancelled { .. } => ErrorCategory::Cancelled,
            Self::InputValidation(_) => ErrorCategory::InputValidation,
            Self::OutputValidation(_) => ErrorCategory::OutputValidation,
            Self::Interrupted => ErrorCategory::Interrupted,
            Self::Model(_) => ErrorCategory::Model,
            Self::ToolExecution { .. } => ErrorCategory::ToolExecution,
            Self::Storage(_) => ErrorCategory::Storage,
            Self::Approval(_) => ErrorCategory::Approval,
            Self::Serialization(_) => ErrorCategory::Serialization,
            Self::Io(_) => ErrorCategory::Io,
            Self::InvalidArgument(_) => ErrorCategory::InvalidArgument,
            Self::InvalidState(_) => ErrorCategory::InvalidState,
        }
    }

    /// Whether the run loop may retry after this error.
    ///
    /// Cancellation, interrupts, and input/output validation failures are
    /// terminal on first occurrence; everything else follows the agent's
    /// retry policy.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::Cancelled { .. }
                | Self::InputValidation(_)
                | Self::OutputValidation(_)
                | Self::Interrupted
        )
    }

    /// Create a tool execution error.
    pub fn tool(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolExecution {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn cancellation_and_validation_errors_are_not_retryable() {
        assert!(!DrummerError::Cancelled {
            run_id: Uuid::new_v4()
        }
        .is_retryable());
        assert!(!DrummerError::InputValidation("bad".into()).is_retryable());
        assert!(!DrummerError::OutputValidation("bad".into()).is_retryable());
        assert!(!DrummerError::Interrupted.is_retryable());
        assert!(DrummerError::Model("boom".into()).is_retryable());
        assert!(DrummerError::Storage("down".into()).is_retryable());
    }

    #[test]
    fn category_matches_variant() {
        assert_eq!(
            DrummerError::tool("search", "timeout").category(),
            ErrorCategory::ToolExecution
        );
        assert_eq!(
            DrummerError::Interrupted.category(),
            ErrorCategory::Interrupted
        );
    }
}
