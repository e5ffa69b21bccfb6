//! promptflow - Workflow Execution Engine for Prompt Orchestration
//!
//! Runs directed sequences of typed steps (render a prompt, run a shell
//! command, call an HTTP endpoint, fan out in parallel, wait for a human)
//! as a persisted state machine. Every transition is checkpointed so that
//! an execution can be inspected or resumed from its id alone.
//!
//! # Architecture
//!
//! - [`workflow`]: Definitions, parsing, validation, conditions and state
//! - [`execution`]: The engine and its step executors
//! - [`store`]: Persistence of execution state and definitions
//! - [`prompts`]: Prompt lookup and template rendering
//! - [`admission`]: Per-caller concurrency limits
//! - [`audit`]: Lifecycle event trail
//! - [`monitoring`]: Timelines over execution history
//! - [`config`]: Engine configuration
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use promptflow::execution::{ShellExecutor, WorkflowEngine};
//! use promptflow::prompts::PromptLibrary;
//! use promptflow::store::FileStateStore;
//! use promptflow::load_workflow;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let workflow = load_workflow("pipeline.yaml")?;
//!
//!     let engine = WorkflowEngine::new(
//!         Arc::new(FileStateStore::new(".promptflow")),
//!         Arc::new(PromptLibrary::new()),
//!     )
//!     .with_shell(ShellExecutor::host());
//!
//!     let result = engine.run_workflow(&workflow, Default::default()).await?;
//!     println!("{}", result.message);
//!     Ok(())
//! }
//! ```

pub mod admission;
pub mod audit;
pub mod config;
pub mod error;
pub mod execution;
pub mod monitoring;
pub mod prompts;
pub mod store;
pub mod workflow;

// Re-export commonly used types
pub use config::EngineConfig;
pub use error::WorkflowError;
pub use execution::{RunWorkflowResult, WorkflowEngine};
pub use workflow::model::{Step, Workflow};
pub use workflow::parser::{load_workflow, parse_workflow, validate_workflow};
pub use workflow::state::{ExecutionStatus, WorkflowExecutionState};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "promptflow";
