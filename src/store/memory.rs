//! In-memory state store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{definition_key, StateStore};
use crate::error::StoreError;
use crate::workflow::{Workflow, WorkflowExecutionState};

/// Keeps snapshots in process memory.
#[derive(Default)]
pub struct MemoryStateStore {
    states: RwLock<HashMap<String, WorkflowExecutionState>>,
    workflows: RwLock<HashMap<String, Workflow>>,
    saves: AtomicUsize,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `save_state` calls served so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn save_state(&self, state: &WorkflowExecutionState) -> Result<(), StoreError> {
        self.states
            .write()
            .await
            .insert(state.execution_id.clone(), state.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_state(
        &self,
        execution_id: &str,
    ) -> Result<Option<WorkflowExecutionState>, StoreError> {
        Ok(self.states.read().await.get(execution_id).cloned())
    }

    async fn list_states(
        &self,
        workflow_id: &str,
    ) -> Result<Vec<WorkflowExecutionState>, StoreError> {
        let mut states: Vec<_> = self
            .states
            .read()
            .await
            .values()
            .filter(|state| state.workflow_id == workflow_id)
            .cloned()
            .collect();
        states.sort_by_key(|state| state.created_at);
        Ok(states)
    }

    async fn save_workflow(&self, workflow: &Workflow) -> Result<(), StoreError> {
        self.workflows.write().await.insert(
            definition_key(&workflow.id, workflow.version),
            workflow.clone(),
        );
        Ok(())
    }

    async fn get_workflow(
        &self,
        workflow_id: &str,
        version: u32,
    ) -> Result<Option<Workflow>, StoreError> {
        Ok(self
            .workflows
            .read()
            .await
            .get(&definition_key(workflow_id, version))
            .cloned())
    }

    async fn list_workflow_versions(&self, workflow_id: &str) -> Result<Vec<u32>, StoreError> {
        let mut versions: Vec<u32> = self
            .workflows
            .read()
            .await
            .values()
            .filter(|workflow| workflow.id == workflow_id)
            .map(|workflow| workflow.version)
            .collect();
        versions.sort_unstable();
        Ok(versions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::Step;
    use serde_json::Map;

    #[tokio::test]
    async fn test_save_and_get_state() {
        let store = MemoryStateStore::new();
        let state = WorkflowExecutionState::new("wf", 1, Map::new(), Some("s1".into()));

        store.save_state(&state).await.unwrap();
        let loaded = store.get_state(&state.execution_id).await.unwrap();

        assert_eq!(loaded, Some(state));
        assert_eq!(store.save_count(), 1);
    }

    #[tokio::test]
    async fn test_get_missing_state() {
        let store = MemoryStateStore::new();
        assert!(store.get_state("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_states_filters_by_workflow() {
        let store = MemoryStateStore::new();
        let first = WorkflowExecutionState::new("wf", 1, Map::new(), None);
        let other = WorkflowExecutionState::new("other", 1, Map::new(), None);
        let second = WorkflowExecutionState::new("wf", 1, Map::new(), None);

        for state in [&first, &other, &second] {
            store.save_state(state).await.unwrap();
        }

        let listed = store.list_states("wf").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].execution_id, first.execution_id);
        assert_eq!(listed[1].execution_id, second.execution_id);
    }

    #[tokio::test]
    async fn test_workflow_versions_are_kept_apart() {
        let store = MemoryStateStore::new();
        let v1 = Workflow::from_steps("wf", vec![Step::shell("a", "echo 1")]);
        let mut v2 = Workflow::from_steps("wf", vec![Step::shell("a", "echo 2")]);
        v2.version = 2;

        store.save_workflow(&v1).await.unwrap();
        store.save_workflow(&v2).await.unwrap();

        assert_eq!(store.get_workflow("wf", 1).await.unwrap(), Some(v1));
        assert_eq!(store.get_workflow("wf", 2).await.unwrap(), Some(v2));
        assert!(store.get_workflow("wf", 3).await.unwrap().is_none());
        assert_eq!(store.list_workflow_versions("wf").await.unwrap(), vec![1, 2]);
    }
}
