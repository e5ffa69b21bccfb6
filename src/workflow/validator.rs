//! Workflow Validation
//!
//! Structural checks run on every definition before an execution starts:
//! - Step field validation
//! - Unique step IDs (parallel sub-steps included)
//! - Branch reference integrity
//! - Parallel block composition
//! - Condition syntax
//! - Workflow ids usable as storage keys

use std::collections::HashSet;

use log::{debug, info};

use super::condition::Condition;
use super::model::{Step, StepKind, Workflow};
use crate::store::is_storage_key;

/// A single problem found in a workflow definition.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationIssue {
    EmptyWorkflow,
    EmptyField { path: String, field: &'static str },
    DuplicateStepId { path: String, id: String },
    InvalidReference { path: String, field: &'static str, reference: String },
    NestedStep { path: String, step_type: &'static str },
    EmptyParallel { path: String },
    InvalidUrl { path: String, url: String },
    InvalidCondition { path: String, message: String },
    ZeroTimeout { path: String },
    InvalidWorkflowId { id: String },
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyWorkflow => write!(f, "steps: Workflow must have at least one step"),
            Self::EmptyField { path, field } => write!(f, "{}.{}: must not be empty", path, field),
            Self::DuplicateStepId { path, id } => {
                write!(f, "{}.id: Duplicate step ID '{}'", path, id)
            }
            Self::InvalidReference {
                path,
                field,
                reference,
            } => write!(
                f,
                "{}.{}: '{}' does not exist in this workflow",
                path, field, reference
            ),
            Self::NestedStep { path, step_type } => write!(
                f,
                "{}.type: '{}' steps are not allowed inside a parallel block",
                path, step_type
            ),
            Self::EmptyParallel { path } => {
                write!(f, "{}.steps: parallel block must contain at least one step", path)
            }
            Self::InvalidUrl { path, url } => {
                write!(f, "{}.url: '{}' is not an absolute http(s) URL", path, url)
            }
            Self::InvalidCondition { path, message } => {
                write!(f, "{}.condition: {}", path, message)
            }
            Self::ZeroTimeout { path } => write!(f, "{}.timeout: must be greater than 0", path),
            Self::InvalidWorkflowId { id } => write!(
                f,
                "workflow.id: '{}' may only contain ASCII letters, digits, '-', '_' and '.'",
                id
            ),
        }
    }
}

/// Validates the entire workflow structure.
///
/// Returns every issue found rather than stopping at the first one, so that
/// callers can report all offending fields at once.
pub fn validate_definition(workflow: &Workflow) -> Result<(), Vec<ValidationIssue>> {
    let mut issues = Vec::new();

    if workflow.id.trim().is_empty() {
        issues.push(ValidationIssue::EmptyField {
            path: "workflow".to_string(),
            field: "id",
        });
    } else if !is_storage_key(&workflow.id) {
        issues.push(ValidationIssue::InvalidWorkflowId {
            id: workflow.id.clone(),
        });
    }

    if workflow.steps.is_empty() {
        issues.push(ValidationIssue::EmptyWorkflow);
        return Err(issues);
    }

    let top_level: HashSet<&str> = workflow.steps.iter().map(|s| s.id.as_str()).collect();
    let mut seen: HashSet<&str> = HashSet::new();

    for (index, step) in workflow.steps.iter().enumerate() {
        let path = format!("steps[{}]", index);
        check_step(step, &path, &top_level, &mut seen, &mut issues);

        if let StepKind::Parallel(block) = &step.kind {
            if block.steps.is_empty() {
                issues.push(ValidationIssue::EmptyParallel { path: path.clone() });
            }
            for (sub_index, sub) in block.steps.iter().enumerate() {
                let sub_path = format!("{}.steps[{}]", path, sub_index);
                if matches!(
                    sub.kind,
                    StepKind::Parallel(_) | StepKind::HumanApproval(_)
                ) {
                    issues.push(ValidationIssue::NestedStep {
                        path: sub_path.clone(),
                        step_type: sub.type_name(),
                    });
                }
                check_step(sub, &sub_path, &top_level, &mut seen, &mut issues);
            }
        }
    }

    if issues.is_empty() {
        info!(
            "Workflow '{}' validated: {} steps",
            workflow.id,
            workflow.steps.len()
        );
        Ok(())
    } else {
        debug!("Workflow '{}' has {} issues", workflow.id, issues.len());
        Err(issues)
    }
}

/// Validates a single step's fields.
fn check_step<'a>(
    step: &'a Step,
    path: &str,
    top_level: &HashSet<&str>,
    seen: &mut HashSet<&'a str>,
    issues: &mut Vec<ValidationIssue>,
) {
    if step.id.trim().is_empty() {
        issues.push(ValidationIssue::EmptyField {
            path: path.to_string(),
            field: "id",
        });
    } else if !seen.insert(step.id.as_str()) {
        issues.push(ValidationIssue::DuplicateStepId {
            path: path.to_string(),
            id: step.id.clone(),
        });
    }

    for (field, reference) in [
        ("onSuccess", &step.on_success),
        ("onFailure", &step.on_failure),
    ] {
        if let Some(target) = reference {
            if !top_level.contains(target.as_str()) {
                issues.push(ValidationIssue::InvalidReference {
                    path: path.to_string(),
                    field,
                    reference: target.clone(),
                });
            }
        }
    }

    if let Some(output) = &step.output {
        if output.trim().is_empty() {
            issues.push(ValidationIssue::EmptyField {
                path: path.to_string(),
                field: "output",
            });
        }
    }

    if step.timeout == Some(0) {
        issues.push(ValidationIssue::ZeroTimeout {
            path: path.to_string(),
        });
    }

    if let Some(condition) = &step.condition {
        if let Err(e) = Condition::compile(condition) {
            issues.push(ValidationIssue::InvalidCondition {
                path: path.to_string(),
                message: e.message,
            });
        }
    }

    match &step.kind {
        StepKind::Prompt(prompt) if prompt.prompt_id.trim().is_empty() => {
            issues.push(ValidationIssue::EmptyField {
                path: path.to_string(),
                field: "promptId",
            });
        }
        StepKind::Shell(shell) if shell.command.trim().is_empty() => {
            issues.push(ValidationIssue::EmptyField {
                path: path.to_string(),
                field: "command",
            });
        }
        StepKind::Http(http) => {
            let valid = reqwest::Url::parse(&http.url)
                .map(|url| matches!(url.scheme(), "http" | "https"))
                .unwrap_or(false);
            if !valid {
                issues.push(ValidationIssue::InvalidUrl {
                    path: path.to_string(),
                    url: http.url.clone(),
                });
            }
        }
        StepKind::HumanApproval(approval) if approval.prompt.trim().is_empty() => {
            issues.push(ValidationIssue::EmptyField {
                path: path.to_string(),
                field: "prompt",
            });
        }
        _ => {}
    }
}

/// Quick validation that returns a list of error messages.
pub fn quick_validate(workflow: &Workflow) -> Vec<String> {
    match validate_definition(workflow) {
        Ok(()) => Vec::new(),
        Err(issues) => issues.iter().map(|issue| issue.to_string()).collect(),
    }
}
