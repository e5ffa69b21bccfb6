//! Execution Monitoring Module
//!
//! Reporting over persisted executions.
//!
//! # Components
//!
//! - [`ExecutionTimeline`]: Step timing and Gantt charts from history

pub mod timeline;

pub use timeline::{ExecutionTimeline, StepSpan};
