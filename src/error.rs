//! Error Types
//!
//! Every fallible concern in the crate has its own error enum. The engine
//! surfaces [`WorkflowError`], which wraps the lower-level ones.

use thiserror::Error;

/// Errors returned by the workflow engine and definition parser.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The workflow definition does not match the expected shape.
    #[error("Invalid workflow: {0}")]
    Validation(String),

    /// A step id referenced by the execution does not exist in the workflow.
    #[error("Step '{0}' not found")]
    StepNotFound(String),

    /// A step exceeded its time budget.
    #[error("Step '{step_id}' timed out after {timeout_ms}ms")]
    StepTimeout { step_id: String, timeout_ms: u64 },

    /// The underlying executor reported a failure.
    #[error("Step '{step_id}' failed: {message}")]
    StepExecution { step_id: String, message: String },

    /// The execution is in a state that does not allow the operation.
    #[error("Execution '{execution_id}' cannot be resumed: {reason}")]
    InvalidState { execution_id: String, reason: String },

    /// The caller already runs the maximum number of workflows.
    #[error("Caller '{caller}' already has {limit} running workflows")]
    AdmissionRejected { caller: String, limit: usize },

    #[error("Execution '{0}' not found")]
    ExecutionNotFound(String),

    #[error("Workflow definition '{workflow_id}' (version {version}) not found")]
    DefinitionNotFound { workflow_id: String, version: u32 },

    #[error("Workflow '{0}' has no stored definition")]
    WorkflowNotFound(String),

    /// A different definition is already stored under this id and version.
    #[error("Workflow '{workflow_id}' version {version} is already stored with different content; bump the version")]
    DefinitionConflict { workflow_id: String, version: u32 },

    #[error("State store error: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to read workflow file: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by [`crate::store::StateStore`] implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Keys end up in file names, so they are restricted to a safe charset.
    #[error("Invalid storage key: '{0}'")]
    InvalidKey(String),
}

/// Errors raised while compiling a step condition.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("Invalid condition '{expression}': {message}")]
pub struct ConditionError {
    pub expression: String,
    pub message: String,
}

/// Errors raised by prompt lookup and template rendering.
#[derive(Debug, Error)]
pub enum PromptError {
    #[error("Prompt '{0}' not found")]
    NotFound(String),

    #[error("Missing template variables: {}", .0.join(", "))]
    MissingVariables(Vec<String>),

    #[error("Failed to load prompt file '{path}': {message}")]
    Load { path: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while appending to the audit trail.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised while loading [`crate::config::EngineConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid value for {key}: '{value}'")]
    InvalidEnv { key: String, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_not_found_message() {
        let err = WorkflowError::StepNotFound("ghost".to_string());
        assert_eq!(err.to_string(), "Step 'ghost' not found");
    }

    #[test]
    fn test_timeout_message_carries_budget() {
        let err = WorkflowError::StepTimeout {
            step_id: "slow".to_string(),
            timeout_ms: 250,
        };
        assert!(err.to_string().contains("250ms"));
        assert!(err.to_string().contains("slow"));
    }

    #[test]
    fn test_step_execution_message() {
        let err = WorkflowError::StepExecution {
            step_id: "s1".to_string(),
            message: "exit 1".to_string(),
        };
        assert_eq!(err.to_string(), "Step 's1' failed: exit 1");
    }

    #[test]
    fn test_store_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err: WorkflowError = StoreError::from(io).into();
        assert!(matches!(err, WorkflowError::Store(_)));
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn test_missing_variables_lists_names() {
        let err = PromptError::MissingVariables(vec!["name".into(), "topic".into()]);
        assert_eq!(err.to_string(), "Missing template variables: name, topic");
    }
}
