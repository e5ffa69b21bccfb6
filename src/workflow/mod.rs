//! Workflow Definition Module
//!
//! Data structures and utilities for defining, parsing, and validating
//! workflows, plus the persisted execution state.
//!
//! # Structure
//!
//! - [`model`]: Workflow and step definitions
//! - [`parser`]: Definition parsing and file loading
//! - [`validator`]: Structural validation rules
//! - [`condition`]: Step condition expression language
//! - [`state`]: Persisted execution state

pub mod condition;
pub mod model;
pub mod parser;
pub mod state;
pub mod validator;

pub use condition::{evaluate_condition, is_truthy, Condition};
pub use model::{
    ApprovalStep, BasicAuth, ErrorPolicy, HttpMethod, HttpStep, ParallelStep, PromptStep,
    ShellStep, Step, StepKind, Workflow, WorkflowContext, DEFAULT_STEP_TIMEOUT_MS,
};
pub use parser::{load_workflow, parse_workflow, parse_workflow_str, save_workflow, validate_workflow};
pub use state::{ExecutionStatus, HistoryEntry, WorkflowExecutionState};
pub use validator::{quick_validate, validate_definition, ValidationIssue};
