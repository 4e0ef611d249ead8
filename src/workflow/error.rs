//! Engine error types.

use std::path::PathBuf;

use thiserror::Error;

use super::checklist::ItemId;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors raised while loading, composing or executing workflows.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A workflow source could not be turned into a valid template.
    #[error("Malformed workflow {}: {reason}", path.display())]
    MalformedWorkflow { path: PathBuf, reason: String },

    /// The `depends_on` graph contains a loop.
    #[error("Cyclic workflow dependency between: {}", .0.join(", "))]
    CyclicDependency(Vec<String>),

    /// An item was asked to change state in a way its lifecycle forbids.
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// Another item is already being worked on.
    #[error("'{0}' is already in progress; finish it with `redgreen done` or release it with `redgreen abandon`")]
    AlreadyInProgress(ItemId),

    /// Nothing is in progress.
    #[error("No item is in progress; start one with `redgreen next`")]
    NoActiveItem,

    /// Every item in the plan is done.
    #[error("Nothing left to do: every checklist item is done")]
    NothingPending,

    /// A gate check reported failure.
    #[error("Gate check '{name}' failed: {reason}")]
    GateCheckFailed { name: String, reason: String },

    /// A commit item cannot be completed while the workflow's gates are not green.
    #[error("Commit blocked for '{workflow}': {reason}; fix it and rerun `redgreen gate`, or `redgreen abandon`")]
    CommitBlocked { workflow: String, reason: String },

    /// No session exists for the project.
    #[error("No active session for {}; start one with `redgreen start <tags...>`", .0.display())]
    NoSession(PathBuf),

    /// A session already exists for the project.
    #[error("A session already exists for {}; use `--force` or `redgreen reset`", .0.display())]
    SessionExists(PathBuf),

    /// Persisted state failed validation.
    #[error("Corrupt session state {}: {reason}", path.display())]
    CorruptState { path: PathBuf, reason: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// Build a `MalformedWorkflow` error.
    pub fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::MalformedWorkflow { path: path.into(), reason: reason.into() }
    }

    /// Process exit code for this error.
    ///
    /// Problems with the workflow sources themselves exit with `2`; every
    /// other failure exits with `1`.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::MalformedWorkflow { .. } | Self::CyclicDependency(_) => 2,
            _ => 1,
        }
    }

    /// Whether the operator can fix this and retry within the same plan.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::MalformedWorkflow { .. } | Self::CyclicDependency(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(EngineError::malformed("a.md", "no phases").exit_code(), 2);
        assert_eq!(EngineError::CyclicDependency(vec!["a".into(), "b".into()]).exit_code(), 2);
        assert_eq!(EngineError::NoActiveItem.exit_code(), 1);
        assert_eq!(EngineError::AlreadyInProgress(ItemId::new("a", "red", 1)).exit_code(), 1);
    }

    #[test]
    fn test_messages_name_next_action() {
        let err = EngineError::AlreadyInProgress(ItemId::new("python-service", "red", 2));
        let msg = err.to_string();
        assert!(msg.contains("python-service/red/2"));
        assert!(msg.contains("redgreen done"));

        let err = EngineError::CyclicDependency(vec!["a".into(), "b".into()]);
        assert_eq!(err.to_string(), "Cyclic workflow dependency between: a, b");
        assert!(!err.is_recoverable());
    }
}
