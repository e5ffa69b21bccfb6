//! Execution State Storage
//!
//! The engine checkpoints a [`WorkflowExecutionState`] after every
//! transition and stores each workflow definition it runs, so that an
//! execution can later be resumed from nothing but its id.
//!
//! - [`MemoryStateStore`]: process-local, used by tests and embedding
//! - [`FileStateStore`]: one JSON document per execution / definition

pub mod file;
pub mod memory;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::workflow::{Workflow, WorkflowExecutionState};

pub use file::FileStateStore;
pub use memory::MemoryStateStore;

/// Persistence backend for execution state and workflow definitions.
///
/// Implementations must return states exactly as they were saved,
/// including the full history.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn save_state(&self, state: &WorkflowExecutionState) -> Result<(), StoreError>;

    async fn get_state(&self, execution_id: &str)
        -> Result<Option<WorkflowExecutionState>, StoreError>;

    /// All executions of a workflow, oldest first.
    async fn list_states(&self, workflow_id: &str)
        -> Result<Vec<WorkflowExecutionState>, StoreError>;

    async fn save_workflow(&self, workflow: &Workflow) -> Result<(), StoreError>;

    async fn get_workflow(&self, workflow_id: &str, version: u32)
        -> Result<Option<Workflow>, StoreError>;

    /// Stored versions of a definition, ascending.
    async fn list_workflow_versions(&self, workflow_id: &str) -> Result<Vec<u32>, StoreError>;
}

/// Whether `key` may be used as a storage key.
///
/// Keys become file names, so only ASCII letters, digits, `-`, `_` and `.`
/// are allowed, and `.`/`..` are rejected.
pub fn is_storage_key(key: &str) -> bool {
    !key.is_empty()
        && key != "."
        && key != ".."
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Key under which a definition version is stored.
pub(crate) fn definition_key(workflow_id: &str, version: u32) -> String {
    format!("{}@{}", workflow_id, version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_keys() {
        for key in ["wf", "daily-report_v2", "a.b", "3f1c-uuid"] {
            assert!(is_storage_key(key), "{}", key);
        }
        for key in ["", ".", "..", "daily report", "a/b", "x:y", "wf@1"] {
            assert!(!is_storage_key(key), "{}", key);
        }
    }
}
