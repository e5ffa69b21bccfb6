//! Workflow Execution Module
//!
//! The engine and the executors it dispatches steps to.
//!
//! # Architecture
//!
//! - [`engine`]: State machine driving executions
//! - [`step`]: Executor contract and step results
//! - [`prompt`], [`shell`], [`http`]: One executor per leaf step type

pub mod engine;
pub mod http;
pub mod prompt;
pub mod shell;
pub mod step;

pub use engine::{RunWorkflowResult, WorkflowEngine, DEFAULT_CALLER};
pub use http::HttpExecutor;
pub use prompt::PromptExecutor;
pub use shell::{ShellExecutor, ShellMode};
pub use step::{StepExecutor, StepResult};
