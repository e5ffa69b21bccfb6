//! JSON file state store.
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/workflow-states/<executionId>.json
//! <root>/workflows/<workflowId>@<version>.json
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;

use super::{definition_key, is_storage_key, StateStore};
use crate::error::StoreError;
use crate::workflow::{Workflow, WorkflowExecutionState};

const STATES_DIR: &str = "workflow-states";
const WORKFLOWS_DIR: &str = "workflows";

/// Persists each snapshot as a pretty-printed JSON document.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    root: PathBuf,
}

impl FileStateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn state_path(&self, execution_id: &str) -> Result<PathBuf, StoreError> {
        Ok(self
            .root
            .join(STATES_DIR)
            .join(format!("{}.json", check_key(execution_id)?)))
    }

    fn workflow_path(&self, workflow_id: &str, version: u32) -> Result<PathBuf, StoreError> {
        check_key(workflow_id)?;
        Ok(self
            .root
            .join(WORKFLOWS_DIR)
            .join(format!("{}.json", definition_key(workflow_id, version))))
    }
}

/// Rejects keys that could escape the store directory.
fn check_key(key: &str) -> Result<&str, StoreError> {
    if is_storage_key(key) {
        Ok(key)
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}

/// Writes to a sibling temp file and renames it over the target.
async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let content = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content).await?;
    fs::rename(&tmp, path).await?;
    debug!("Wrote {}", path.display());
    Ok(())
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn save_state(&self, state: &WorkflowExecutionState) -> Result<(), StoreError> {
        let path = self.state_path(&state.execution_id)?;
        write_json(&path, state).await
    }

    async fn get_state(
        &self,
        execution_id: &str,
    ) -> Result<Option<WorkflowExecutionState>, StoreError> {
        let path = self.state_path(execution_id)?;
        read_json(&path).await
    }

    async fn list_states(
        &self,
        workflow_id: &str,
    ) -> Result<Vec<WorkflowExecutionState>, StoreError> {
        let dir = self.root.join(STATES_DIR);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut states = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match read_json::<WorkflowExecutionState>(&path).await {
                Ok(Some(state)) if state.workflow_id == workflow_id => states.push(state),
                Ok(_) => {}
                Err(e) => warn!("Skipping unreadable state file {}: {}", path.display(), e),
            }
        }

        states.sort_by_key(|state| state.created_at);
        Ok(states)
    }

    async fn save_workflow(&self, workflow: &Workflow) -> Result<(), StoreError> {
        let path = self.workflow_path(&workflow.id, workflow.version)?;
        write_json(&path, workflow).await
    }

    async fn get_workflow(
        &self,
        workflow_id: &str,
        version: u32,
    ) -> Result<Option<Workflow>, StoreError> {
        let path = self.workflow_path(workflow_id, version)?;
        read_json(&path).await
    }

    async fn list_workflow_versions(&self, workflow_id: &str) -> Result<Vec<u32>, StoreError> {
        check_key(workflow_id)?;
        let dir = self.root.join(WORKFLOWS_DIR);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut versions = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".json")) else {
                continue;
            };
            if let Some((id, version)) = stem.rsplit_once('@') {
                if id == workflow_id {
                    if let Ok(version) = version.parse::<u32>() {
                        versions.push(version);
                    }
                }
            }
        }

        versions.sort_unstable();
        Ok(versions)
    }
}
