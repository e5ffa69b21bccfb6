//! Audit Trail
//!
//! Append-only record of execution lifecycle events. Writing is
//! best-effort: a failing sink is reported as a warning and never affects
//! the workflow.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::error::AuditError;

/// Lifecycle event kinds.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    Start,
    StepFailure,
    Paused,
    Resume,
    Completed,
    Failed,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
    pub workflow_id: String,
    pub event_type: AuditEventType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl AuditEvent {
    pub fn new(
        user_id: impl Into<String>,
        workflow_id: impl Into<String>,
        event_type: AuditEventType,
        details: Option<Value>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            user_id: user_id.into(),
            workflow_id: workflow_id.into(),
            event_type,
            details,
        }
    }
}

/// Destination for audit events.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: &AuditEvent) -> Result<(), AuditError>;
}

/// Appends one JSON document per line.
pub struct FileAuditLog {
    path: PathBuf,
    file: tokio::sync::Mutex<File>,
}

impl FileAuditLog {
    /// Opens (or creates) the log, creating parent directories as needed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, AuditError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: tokio::sync::Mutex::new(File::from_std(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AuditSink for FileAuditLog {
    async fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Keeps events in memory.
#[derive(Default)]
pub struct MemoryAuditLog {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Event types in recording order.
    pub fn event_types(&self) -> Vec<AuditEventType> {
        self.events().iter().map(|event| event.event_type).collect()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditLog {
    async fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
        Ok(())
    }
}

/// Drops every event.
pub struct NullAuditLog;

#[async_trait]
impl AuditSink for NullAuditLog {
    async fn record(&self, _event: &AuditEvent) -> Result<(), AuditError> {
        Ok(())
    }
}

/// Best-effort front end used by the engine.
pub struct AuditLogger {
    sink: Box<dyn AuditSink>,
}

impl AuditLogger {
    pub fn new(sink: impl AuditSink + 'static) -> Self {
        Self {
            sink: Box::new(sink),
        }
    }

    pub fn disabled() -> Self {
        Self::new(NullAuditLog)
    }

    /// Records an event, logging a warning if the sink fails.
    pub async fn log(
        &self,
        user_id: &str,
        workflow_id: &str,
        event_type: AuditEventType,
        details: Option<Value>,
    ) {
        let event = AuditEvent::new(user_id, workflow_id, event_type, details);
        if let Err(e) = self.sink.record(&event).await {
            warn!(
                "Failed to write audit event {:?} for workflow '{}': {}",
                event_type, workflow_id, e
            );
        }
    }
}

#[async_trait]
impl<S: AuditSink + ?Sized> AuditSink for Arc<S> {
    async fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        (**self).record(event).await
    }
}
