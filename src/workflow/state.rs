//! Workflow Execution State
//!
//! The persisted, resumable snapshot of one workflow run. The engine is the
//! only writer; stores persist and return it verbatim.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::model::WorkflowContext;

/// Lifecycle status of an execution.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Paused,
    Completed,
    Failed,
}

impl ExecutionStatus {
    /// `completed` and `failed` are final.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One attempted step in the execution history.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub step_id: String,
    pub executed_at: DateTime<Utc>,
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Wall-clock time spent in the step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Persistent state for a workflow execution.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExecutionState {
    pub execution_id: String,
    pub workflow_id: String,

    /// Version of the definition this execution runs
    #[serde(default)]
    pub workflow_version: u32,

    pub status: ExecutionStatus,
    pub context: WorkflowContext,

    /// The step about to execute or last attempted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step_id: Option<String>,

    #[serde(default)]
    pub history: Vec<HistoryEntry>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowExecutionState {
    /// Creates a fresh `running` execution with a newly generated id.
    pub fn new(
        workflow_id: impl Into<String>,
        workflow_version: u32,
        context: WorkflowContext,
        first_step_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            execution_id: Uuid::new_v4().to_string(),
            workflow_id: workflow_id.into(),
            workflow_version,
            status: ExecutionStatus::Running,
            context,
            current_step_id: first_step_id,
            history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Appends a history entry.
    pub fn record(&mut self, entry: HistoryEntry) {
        self.history.push(entry);
        self.touch();
    }

    /// Refreshes `updatedAt`.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn mark_running(&mut self) {
        self.status = ExecutionStatus::Running;
        self.touch();
    }

    pub fn mark_paused(&mut self) {
        self.status = ExecutionStatus::Paused;
        self.touch();
    }

    /// Marks the execution completed and clears the step cursor.
    pub fn mark_completed(&mut self) {
        self.status = ExecutionStatus::Completed;
        self.current_step_id = None;
        self.touch();
    }

    /// Marks the execution failed, leaving the cursor on the failing step.
    pub fn mark_failed(&mut self) {
        self.status = ExecutionStatus::Failed;
        self.touch();
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Number of history entries that recorded a failure.
    pub fn failure_count(&self) -> usize {
        self.history.iter().filter(|entry| !entry.success).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    fn entry(step_id: &str, success: bool) -> HistoryEntry {
        HistoryEntry {
            step_id: step_id.to_string(),
            executed_at: Utc::now(),
            success,
            output: success.then(|| json!("ok")),
            error: (!success).then(|| "boom".to_string()),
            duration_ms: Some(3),
        }
    }

    #[test]
    fn test_state_creation() {
        let state = WorkflowExecutionState::new("wf", 2, Map::new(), Some("s1".into()));

        assert_eq!(state.workflow_id, "wf");
        assert_eq!(state.workflow_version, 2);
        assert_eq!(state.status, ExecutionStatus::Running);
        assert_eq!(state.current_step_id.as_deref(), Some("s1"));
        assert!(state.history.is_empty());
        assert!(Uuid::parse_str(&state.execution_id).is_ok());
    }

    #[test]
    fn test_execution_ids_are_unique() {
        let a = WorkflowExecutionState::new("wf", 1, Map::new(), None);
        let b = WorkflowExecutionState::new("wf", 1, Map::new(), None);
        assert_ne!(a.execution_id, b.execution_id);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(!ExecutionStatus::Paused.is_terminal());
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
    }

    #[test]
    fn test_mark_completed_clears_cursor() {
        let mut state = WorkflowExecutionState::new("wf", 1, Map::new(), Some("s1".into()));
        state.mark_completed();

        assert_eq!(state.status, ExecutionStatus::Completed);
        assert!(state.current_step_id.is_none());
        assert!(state.is_terminal());
    }

    #[test]
    fn test_mark_failed_keeps_cursor() {
        let mut state = WorkflowExecutionState::new("wf", 1, Map::new(), Some("s1".into()));
        state.mark_failed();

        assert_eq!(state.status, ExecutionStatus::Failed);
        assert_eq!(state.current_step_id.as_deref(), Some("s1"));
    }

    #[test]
    fn test_record_appends_in_order() {
        let mut state = WorkflowExecutionState::new("wf", 1, Map::new(), None);
        state.record(entry("a", true));
        state.record(entry("b", false));

        let ids: Vec<_> = state.history.iter().map(|e| e.step_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(state.failure_count(), 1);
        assert!(state.updated_at >= state.created_at);
    }

    #[test]
    fn test_state_serializes_camel_case() {
        let mut state = WorkflowExecutionState::new("wf", 1, Map::new(), Some("s1".into()));
        state.record(entry("s1", true));
        let value = serde_json::to_value(&state).unwrap();

        assert_eq!(value["status"], "running");
        assert_eq!(value["currentStepId"], "s1");
        assert_eq!(value["history"][0]["stepId"], "s1");
        assert!(value.get("executionId").is_some());
        assert!(value.get("updatedAt").is_some());
    }

    #[test]
    fn test_state_serialization_roundtrip() {
        let mut context = Map::new();
        context.insert("o1".into(), json!("hi\n"));
        let mut state = WorkflowExecutionState::new("wf", 1, context, Some("s2".into()));
        state.record(entry("s1", true));
        state.record(entry("s2", false));

        let json = serde_json::to_string_pretty(&state).unwrap();
        let loaded: WorkflowExecutionState = serde_json::from_str(&json).unwrap();

        assert_eq!(loaded, state);
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        let result: Result<ExecutionStatus, _> = serde_json::from_value(json!("cancelled"));
        assert!(result.is_err());
    }
}
