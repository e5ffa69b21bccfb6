//! Step Executor Contract
//!
//! Every leaf step type has an executor that runs it against the current
//! context. Executors never fail: errors are reported through
//! [`StepResult`] so the engine can apply the step's failure policy.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::workflow::WorkflowContext;

/// Outcome of a single step execution.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StepResult {
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepResult {
    pub fn ok(output: impl Into<Value>) -> Self {
        Self {
            success: true,
            output: Some(output.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
        }
    }

    /// Error text, or a generic message for failures without one.
    pub fn error_message(&self) -> String {
        self.error
            .clone()
            .unwrap_or_else(|| "Step failed without an error message".to_string())
    }
}

/// Runs one kind of step.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Type-specific step payload this executor understands.
    type Step: Send + Sync;

    async fn run_step(&self, step: &Self::Step, context: &WorkflowContext) -> StepResult;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_constructors() {
        let ok = StepResult::ok("hi");
        assert!(ok.success);
        assert_eq!(ok.output, Some(json!("hi")));

        let failed = StepResult::failed("boom");
        assert!(!failed.success);
        assert_eq!(failed.error_message(), "boom");
    }

    #[test]
    fn test_missing_error_message() {
        let result = StepResult {
            success: false,
            output: None,
            error: None,
        };
        assert!(!result.error_message().is_empty());
    }
}
