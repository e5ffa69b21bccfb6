//! Workflow Parser
//!
//! Turns untyped definitions (JSON values, YAML or JSON files) into
//! validated [`Workflow`]s.

use std::fs;
use std::path::Path;

use log::{debug, info};
use serde_json::{Map, Value};

use super::model::Workflow;
use super::validator::validate_definition;
use crate::error::WorkflowError;

/// Parses and validates a workflow definition.
///
/// Schema mismatches and structural problems are both reported as
/// [`WorkflowError::Validation`], with one line per offending field.
///
/// # Example
///
/// ```
/// use promptflow::workflow::parse_workflow;
/// use serde_json::json;
///
/// let workflow = parse_workflow(&json!({
///     "id": "hello",
///     "name": "Hello",
///     "version": 1,
///     "steps": [{"id": "s1", "type": "shell", "command": "echo hi", "output": "o1"}]
/// }))
/// .unwrap();
/// assert_eq!(workflow.steps.len(), 1);
/// ```
pub fn parse_workflow(definition: &Value) -> Result<Workflow, WorkflowError> {
    let problems = check_shape(definition);
    if !problems.is_empty() {
        return Err(WorkflowError::Validation(problems.join("\n")));
    }

    let workflow: Workflow = serde_json::from_value(definition.clone())
        .map_err(|e| WorkflowError::Validation(e.to_string()))?;

    validate_definition(&workflow).map_err(|issues| {
        let messages: Vec<String> = issues.iter().map(|issue| issue.to_string()).collect();
        WorkflowError::Validation(messages.join("\n"))
    })?;

    debug!(
        "Parsed workflow '{}' v{} with {} steps",
        workflow.id,
        workflow.version,
        workflow.steps.len()
    );
    Ok(workflow)
}

/// Boolean form of [`parse_workflow`]. Never fails.
pub fn validate_workflow(definition: &Value) -> bool {
    parse_workflow(definition).is_ok()
}

/// Parses a YAML or JSON document into a validated workflow.
pub fn parse_workflow_str(content: &str) -> Result<Workflow, WorkflowError> {
    let definition: Value = serde_yaml::from_str(content).map_err(|e| {
        WorkflowError::Validation(format!(
            "Failed to parse workflow document: {}. Check the file format.",
            e
        ))
    })?;
    parse_workflow(&definition)
}

/// Loads a workflow from a YAML or JSON file.
///
/// # Example
///
/// ```rust,no_run
/// use promptflow::workflow::load_workflow;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let workflow = load_workflow("pipeline.yaml")?;
///     println!("Loaded {} steps", workflow.steps.len());
///     Ok(())
/// }
/// ```
pub fn load_workflow(path: impl AsRef<Path>) -> Result<Workflow, WorkflowError> {
    let path = path.as_ref();
    info!("Loading workflow from: {}", path.display());

    let content = fs::read_to_string(path)?;
    debug!("Workflow document loaded ({} bytes)", content.len());

    parse_workflow_str(&content)
}

/// Saves a workflow as JSON when the path ends in `.json`, YAML otherwise.
pub fn save_workflow(workflow: &Workflow, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
    let path = path.as_ref();
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let content = if is_json {
        serde_json::to_string_pretty(workflow)?
    } else {
        serde_yaml::to_string(workflow)?
    };
    fs::write(path, content)?;
    info!("Workflow saved to: {}", path.display());
    Ok(())
}

const STEP_TYPES: &[&str] = &["prompt", "shell", "http", "parallel", "human-approval"];
const HTTP_METHODS: &[&str] = &["GET", "POST", "PUT", "DELETE", "PATCH"];
const ERROR_POLICIES: &[&str] = &["fail", "continue", "abort"];

/// Collects every missing or mistyped field of an untyped definition.
///
/// Each entry reads `<path>: <problem>`, e.g. `steps[0].command: missing
/// required field`.
fn check_shape(definition: &Value) -> Vec<String> {
    let mut shape = ShapeCheck::default();
    let Some(root) = definition.as_object() else {
        shape.problem("workflow", "expected an object");
        return shape.problems;
    };

    shape.string(root, "", "id");
    shape.string(root, "", "name");
    shape.required(root, "", "version", "a non-negative integer", |v| {
        v.as_u64().map_or(false, |n| n <= u64::from(u32::MAX))
    });
    shape.optional(root, "", "variables", "an object", Value::is_object);
    if let Some(steps) = shape.required(root, "", "steps", "an array", Value::is_array) {
        shape.steps(steps, "steps");
    }
    shape.problems
}

#[derive(Default)]
struct ShapeCheck {
    problems: Vec<String>,
}

impl ShapeCheck {
    fn problem(&mut self, path: &str, message: &str) {
        self.problems.push(format!("{}: {}", path, message));
    }

    fn required<'a>(
        &mut self,
        object: &'a Map<String, Value>,
        prefix: &str,
        field: &str,
        expected: &str,
        accepts: impl Fn(&Value) -> bool,
    ) -> Option<&'a Value> {
        let path = join_path(prefix, field);
        match object.get(field) {
            None | Some(Value::Null) => {
                self.problem(&path, "missing required field");
                None
            }
            Some(value) if accepts(value) => Some(value),
            Some(_) => {
                self.problem(&path, &format!("expected {}", expected));
                None
            }
        }
    }

    fn optional(
        &mut self,
        object: &Map<String, Value>,
        prefix: &str,
        field: &str,
        expected: &str,
        accepts: impl Fn(&Value) -> bool,
    ) {
        match object.get(field) {
            None | Some(Value::Null) => {}
            Some(value) if accepts(value) => {}
            Some(_) => self.problem(&join_path(prefix, field), &format!("expected {}", expected)),
        }
    }

    fn string(&mut self, object: &Map<String, Value>, prefix: &str, field: &str) {
        self.required(object, prefix, field, "a string", Value::is_string);
    }

    fn one_of(&mut self, object: &Map<String, Value>, prefix: &str, field: &str, allowed: &[&str]) {
        if let Some(value) = object.get(field).and_then(Value::as_str) {
            if !allowed.contains(&value) {
                self.problem(
                    &join_path(prefix, field),
                    &format!("'{}' is not one of {}", value, allowed.join(", ")),
                );
            }
        }
    }

    fn steps(&mut self, steps: &Value, path: &str) {
        let Some(steps) = steps.as_array() else { return };
        for (index, step) in steps.iter().enumerate() {
            let step_path = format!("{}[{}]", path, index);
            match step.as_object() {
                Some(step) => self.step(step, &step_path),
                None => self.problem(&step_path, "expected an object"),
            }
        }
    }

    fn step(&mut self, step: &Map<String, Value>, path: &str) {
        self.string(step, path, "id");
        for field in ["condition", "onSuccess", "onFailure", "output"] {
            self.optional(step, path, field, "a string", Value::is_string);
        }
        self.optional(step, path, "timeout", "a non-negative integer", Value::is_u64);
        self.optional(step, path, "errorPolicy", "a string", Value::is_string);
        self.one_of(step, path, "errorPolicy", ERROR_POLICIES);

        let Some(step_type) = self
            .required(step, path, "type", "a string", Value::is_string)
            .and_then(Value::as_str)
        else {
            return;
        };

        match step_type {
            "prompt" => {
                self.string(step, path, "promptId");
                self.optional(step, path, "input", "an object", Value::is_object);
            }
            "shell" => self.string(step, path, "command"),
            "http" => {
                self.string(step, path, "method");
                self.one_of(step, path, "method", HTTP_METHODS);
                self.string(step, path, "url");
                self.optional(step, path, "headers", "an object of strings", |v| {
                    v.as_object()
                        .map_or(false, |headers| headers.values().all(Value::is_string))
                });
                if let Some(auth) = step.get("auth").filter(|v| !v.is_null()) {
                    let auth_path = join_path(path, "auth");
                    match auth.as_object() {
                        Some(auth) => {
                            self.string(auth, &auth_path, "username");
                            self.string(auth, &auth_path, "password");
                        }
                        None => self.problem(&auth_path, "expected an object"),
                    }
                }
            }
            "parallel" => {
                if let Some(steps) = self.required(step, path, "steps", "an array", Value::is_array) {
                    self.steps(steps, &join_path(path, "steps"));
                }
            }
            "human-approval" => self.string(step, path, "prompt"),
            other => self.problem(
                &join_path(path, "type"),
                &format!("'{}' is not one of {}", other, STEP_TYPES.join(", ")),
            ),
        }
    }
}

fn join_path(prefix: &str, field: &str) -> String {
    if prefix.is_empty() {
        field.to_string()
    } else {
        format!("{}.{}", prefix, field)
    }
}
