//! Error types and handling
//!
//! This module provides the error types used throughout the Praxis engine.
//! All errors implement the `PraxisErrorExt` trait which provides user-facing
//! hints and indicates whether an error can be worked around by a fallback.
//!
//! # Failure classes
//!
//! The orchestrator sorts failures into a handful of classes:
//!
//! - **Transport**: a collaborator (model provider, network) was unreachable or timed out
//! - **Parse**: a structured response could not be decoded
//! - **ActionFailed**: an action ran and reported failure
//! - **Validation**: a decoded response broke a contract (e.g. unknown action)
//!
//! Transport, parse and validation failures always have a deterministic
//! fallback and are therefore recoverable.

use thiserror::Error;

/// Extra context carried by every engine error
pub trait PraxisErrorExt {
    /// Returns a short hint that is safe to show to end users
    fn user_hint(&self) -> &str;

    /// Returns whether the caller can fall back or retry
    fn is_recoverable(&self) -> bool;
}

/// Main engine error type
///
/// # Examples
///
/// ```
/// use sdk::errors::{EngineError, PraxisErrorExt};
///
/// let error = EngineError::Transport("connection refused".to_string());
/// assert!(error.is_recoverable());
///
/// let fatal = EngineError::DuplicateAction("read_file".to_string());
/// assert!(!fatal.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Database errors
    #[error("Database error: {0}")]
    Database(String),

    // Collaborator failures
    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Parse failure: {0}")]
    Parse(String),

    #[error("Validation failure: {0}")]
    Validation(String),

    #[error("Embedding failed: {0}")]
    Embedding(String),

    // Task lifecycle errors
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Orchestrator is shutting down")]
    ShuttingDown,

    // Action errors
    #[error("Action failed: {0}")]
    ActionFailed(String),

    #[error("Action not found: {0}")]
    ActionNotFound(String),

    #[error("Duplicate action registered: {0}")]
    DuplicateAction(String),

    #[error("Action timed out after {0} seconds")]
    ActionTimeout(u64),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    // File system security errors
    #[error("Path denied: {0:?}")]
    PathDenied(std::path::PathBuf),

    #[error("Path outside workspace: {0:?}")]
    PathOutsideWorkspace(std::path::PathBuf),

    #[error("Path canonicalization failed for {0:?}: {1}")]
    PathCanonicalization(std::path::PathBuf, String),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PraxisErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Config(_) => "Check your config.toml file for errors",
            Self::Database(_) => "Database operation failed. Check the data directory",

            Self::Transport(_) => "Model provider unavailable. Check the provider and network",
            Self::Parse(_) => "Model response was malformed. A fallback was used",
            Self::Validation(_) => "Model response was rejected. A fallback was used",
            Self::Embedding(_) => "Could not embed text. Check the embedding provider",

            Self::InvalidTransition { .. } => "Task state changed unexpectedly",
            Self::TaskNotFound(_) => "No such task",
            Self::ShuttingDown => "The orchestrator is stopping. Try again after restart",

            Self::ActionFailed(_) => "Action failed",
            Self::ActionNotFound(_) => "The requested action is not available",
            Self::DuplicateAction(_) => "Two actions share a name. Check the registry",
            Self::ActionTimeout(_) => "Action took too long. Try a smaller request",
            Self::PermissionDenied(_) => "This capability is disabled in [security]",

            Self::PathDenied(_) => "Access to this path is not allowed",
            Self::PathOutsideWorkspace(_) => "Operation must be within workspace",
            Self::PathCanonicalization(_, _) => "Invalid path specified",

            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            Self::Config(_)
            | Self::DuplicateAction(_)
            | Self::InvalidTransition { .. }
            | Self::ShuttingDown => false,
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collaborator_failures_are_recoverable() {
        assert!(EngineError::Transport("timeout".into()).is_recoverable());
        assert!(EngineError::Parse("eof".into()).is_recoverable());
        assert!(EngineError::Validation("bad".into()).is_recoverable());
    }

    #[test]
    fn test_invalid_transition_message() {
        let err = EngineError::InvalidTransition {
            from: "completed".into(),
            to: "planning".into(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid status transition: completed -> planning"
        );
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_hints_do_not_leak_paths() {
        let err = EngineError::PathDenied(std::path::PathBuf::from("/home/user/.ssh/id_rsa"));
        assert!(!err.user_hint().contains(".ssh"));
    }
}
