//! Workflow Data Model
//!
//! Core data structures describing a workflow definition and its steps.
//!
//! # Example YAML Format
//!
//! ```yaml
//! id: summarize
//! name: Summarize a document
//! version: 1
//! variables:
//!   language: en
//! steps:
//!   - id: fetch
//!     type: http
//!     method: GET
//!     url: https://example.com/doc.txt
//!     output: document
//!
//!   - id: summary
//!     type: prompt
//!     promptId: summarize-v2
//!     input:
//!       text: "{{context.document}}"
//!       language: "{{context.language}}"
//!     output: summary
//!
//!   - id: archive
//!     type: shell
//!     condition: summary != ""
//!     command: echo archived
//!     errorPolicy: continue
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Mutable variable bag shared by every step of one execution.
pub type WorkflowContext = Map<String, Value>;

/// Default per-step time budget in milliseconds.
pub const DEFAULT_STEP_TIMEOUT_MS: u64 = 60_000;

/// What happens when a step fails and no `onFailure` branch is declared.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Halt the workflow in the `failed` state
    #[default]
    #[serde(alias = "abort")]
    Fail,
    /// Record the failure and advance to the next step in document order
    Continue,
}

/// A single step of a workflow.
///
/// Fields shared by every step type live here; the type-specific payload is
/// carried by [`StepKind`], flattened into the same object and discriminated
/// by its `type` field.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// Unique identifier within the workflow
    pub id: String,

    /// Expression deciding whether the step runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,

    /// Time budget in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    /// Step to jump to after success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_success: Option<String>,

    /// Step to jump to after failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<String>,

    #[serde(default)]
    pub error_policy: ErrorPolicy,

    /// Context key that receives the step result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    #[serde(flatten)]
    pub kind: StepKind,
}

/// Type-specific part of a [`Step`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StepKind {
    Prompt(PromptStep),
    Shell(ShellStep),
    Http(HttpStep),
    Parallel(ParallelStep),
    HumanApproval(ApprovalStep),
}

/// Renders a stored prompt with resolved variables.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PromptStep {
    pub prompt_id: String,

    /// Variable name -> literal value or `{{context.<key>}}` reference
    #[serde(default)]
    pub input: BTreeMap<String, Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ShellStep {
    pub command: String,
}

/// HTTP methods accepted by `http` steps.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
        }
    }
}

/// Credentials for HTTP Basic authentication.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

/// Calls an HTTP endpoint.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct HttpStep {
    pub method: HttpMethod,
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<BasicAuth>,
}

/// Runs its sub-steps concurrently and joins them before advancing.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ParallelStep {
    pub steps: Vec<Step>,
}

/// Pauses the execution until a human supplies an input value.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ApprovalStep {
    pub prompt: String,
}

impl Step {
    /// Creates a step with default common fields.
    pub fn new(id: impl Into<String>, kind: StepKind) -> Self {
        Self {
            id: id.into().trim().to_string(),
            condition: None,
            timeout: None,
            on_success: None,
            on_failure: None,
            error_policy: ErrorPolicy::Fail,
            output: None,
            kind,
        }
    }

    /// Creates a `shell` step.
    ///
    /// # Example
    ///
    /// ```
    /// use promptflow::workflow::{ErrorPolicy, Step};
    ///
    /// let step = Step::shell("greet", "echo hi")
    ///     .with_output("greeting")
    ///     .with_error_policy(ErrorPolicy::Continue);
    /// assert_eq!(step.type_name(), "shell");
    /// ```
    pub fn shell(id: impl Into<String>, command: impl Into<String>) -> Self {
        Self::new(
            id,
            StepKind::Shell(ShellStep {
                command: command.into(),
            }),
        )
    }

    /// Creates a `prompt` step with no inputs.
    pub fn prompt(id: impl Into<String>, prompt_id: impl Into<String>) -> Self {
        Self::new(
            id,
            StepKind::Prompt(PromptStep {
                prompt_id: prompt_id.into(),
                input: BTreeMap::new(),
            }),
        )
    }

    /// Creates an `http` step with no body, headers or auth.
    pub fn http(id: impl Into<String>, method: HttpMethod, url: impl Into<String>) -> Self {
        Self::new(
            id,
            StepKind::Http(HttpStep {
                method,
                url: url.into(),
                body: None,
                headers: BTreeMap::new(),
                auth: None,
            }),
        )
    }

    /// Creates a `parallel` block over the given sub-steps.
    pub fn parallel(id: impl Into<String>, steps: Vec<Step>) -> Self {
        Self::new(id, StepKind::Parallel(ParallelStep { steps }))
    }

    /// Creates a `human-approval` step.
    pub fn approval(id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self::new(
            id,
            StepKind::HumanApproval(ApprovalStep {
                prompt: prompt.into(),
            }),
        )
    }

    pub fn with_output(mut self, key: impl Into<String>) -> Self {
        self.output = Some(key.into());
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout = Some(timeout_ms);
        self
    }

    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    pub fn on_success(mut self, step_id: impl Into<String>) -> Self {
        self.on_success = Some(step_id.into());
        self
    }

    pub fn on_failure(mut self, step_id: impl Into<String>) -> Self {
        self.on_failure = Some(step_id.into());
        self
    }

    /// Adds an input variable to a `prompt` step. No-op for other types.
    pub fn with_input(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        if let StepKind::Prompt(prompt) = &mut self.kind {
            prompt.input.insert(name.into(), value.into());
        }
        self
    }

    /// The `type` discriminator as written in definitions.
    pub fn type_name(&self) -> &'static str {
        match &self.kind {
            StepKind::Prompt(_) => "prompt",
            StepKind::Shell(_) => "shell",
            StepKind::Http(_) => "http",
            StepKind::Parallel(_) => "parallel",
            StepKind::HumanApproval(_) => "human-approval",
        }
    }

    /// Effective time budget in milliseconds, falling back to `default_ms`.
    pub fn timeout_ms(&self, default_ms: u64) -> u64 {
        self.timeout.unwrap_or(default_ms)
    }
}

/// Represents a complete workflow definition.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    pub version: u32,

    /// Initial context defaults
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub variables: WorkflowContext,

    /// Ordered list of steps in the workflow
    pub steps: Vec<Step>,
}

impl Workflow {
    /// Creates an empty workflow at version 1.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: 1,
            variables: Map::new(),
            steps: Vec::new(),
        }
    }

    /// Creates a workflow from a list of steps.
    pub fn from_steps(id: impl Into<String>, steps: Vec<Step>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            version: 1,
            variables: Map::new(),
            steps,
        }
    }

    /// Sets a default context variable.
    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    /// Adds a step to the workflow.
    pub fn add_step(&mut self, step: Step) -> Result<(), String> {
        if self.steps.iter().any(|s| s.id == step.id) {
            return Err(format!("Step '{}' already exists", step.id));
        }
        self.steps.push(step);
        Ok(())
    }

    /// Gets a top-level step by ID.
    pub fn get_step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Position of a top-level step in document order.
    pub fn step_index(&self, id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == id)
    }

    /// ID of the step following `id` in document order, if any.
    pub fn next_step_id(&self, id: &str) -> Option<String> {
        self.step_index(id)
            .and_then(|index| self.steps.get(index + 1))
            .map(|step| step.id.clone())
    }

    /// ID of the first step, where every execution starts.
    pub fn first_step_id(&self) -> Option<String> {
        self.steps.first().map(|step| step.id.clone())
    }

    /// Returns the number of top-level steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if the workflow has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_step_deserializes_flattened_kind() {
        let step: Step = serde_json::from_value(json!({
            "id": "s1",
            "type": "shell",
            "command": "echo hi",
            "output": "o1",
            "errorPolicy": "continue",
            "timeout": 500
        }))
        .unwrap();

        assert_eq!(step.id, "s1");
        assert_eq!(step.output.as_deref(), Some("o1"));
        assert_eq!(step.error_policy, ErrorPolicy::Continue);
        assert_eq!(step.timeout_ms(DEFAULT_STEP_TIMEOUT_MS), 500);
        assert_eq!(
            step.kind,
            StepKind::Shell(ShellStep {
                command: "echo hi".to_string()
            })
        );
    }

    #[test]
    fn test_error_policy_defaults_to_fail() {
        let step: Step = serde_json::from_value(json!({
            "id": "s1",
            "type": "shell",
            "command": "true"
        }))
        .unwrap();
        assert_eq!(step.error_policy, ErrorPolicy::Fail);
        assert_eq!(step.timeout_ms(DEFAULT_STEP_TIMEOUT_MS), DEFAULT_STEP_TIMEOUT_MS);
        assert_eq!(step.timeout_ms(1_500), 1_500);
    }

    #[test]
    fn test_abort_is_alias_for_fail() {
        let policy: ErrorPolicy = serde_json::from_value(json!("abort")).unwrap();
        assert_eq!(policy, ErrorPolicy::Fail);
    }

    #[test]
    fn test_http_step_fields() {
        let step: Step = serde_json::from_value(json!({
            "id": "call",
            "type": "http",
            "method": "POST",
            "url": "https://example.com/hook",
            "body": {"a": 1},
            "headers": {"X-Trace": "1"},
            "auth": {"username": "u", "password": "p"}
        }))
        .unwrap();

        let StepKind::Http(http) = &step.kind else {
            panic!("expected http step");
        };
        assert_eq!(http.method, HttpMethod::Post);
        assert_eq!(http.headers.get("X-Trace").map(String::as_str), Some("1"));
        assert_eq!(http.auth.as_ref().unwrap().username, "u");
    }

    #[test]
    fn test_parallel_step_nests_steps() {
        let step: Step = serde_json::from_value(json!({
            "id": "fan",
            "type": "parallel",
            "steps": [
                {"id": "a", "type": "shell", "command": "echo a"},
                {"id": "b", "type": "shell", "command": "echo b"}
            ]
        }))
        .unwrap();

        let StepKind::Parallel(block) = &step.kind else {
            panic!("expected parallel step");
        };
        assert_eq!(block.steps.len(), 2);
        assert_eq!(step.type_name(), "parallel");
    }

    #[test]
    fn test_human_approval_type_name() {
        let step: Step = serde_json::from_value(json!({
            "id": "approve",
            "type": "human-approval",
            "prompt": "Ship it?",
            "output": "decision"
        }))
        .unwrap();
        assert_eq!(step.type_name(), "human-approval");
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let result: Result<Step, _> = serde_json::from_value(json!({
            "id": "x",
            "type": "teleport"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_serialization_keeps_camel_case() {
        let step = Step::prompt("p", "greeting")
            .with_input("name", "{{context.user}}")
            .on_success("done");
        let value = serde_json::to_value(&step).unwrap();

        assert_eq!(value["type"], "prompt");
        assert_eq!(value["promptId"], "greeting");
        assert_eq!(value["onSuccess"], "done");
        assert_eq!(value["input"]["name"], "{{context.user}}");
    }

    #[test]
    fn test_workflow_navigation() {
        let workflow = Workflow::from_steps(
            "wf",
            vec![Step::shell("a", "echo a"), Step::shell("b", "echo b")],
        );

        assert_eq!(workflow.first_step_id().as_deref(), Some("a"));
        assert_eq!(workflow.next_step_id("a").as_deref(), Some("b"));
        assert_eq!(workflow.next_step_id("b"), None);
        assert_eq!(workflow.step_index("b"), Some(1));
        assert!(workflow.get_step("missing").is_none());
    }

    #[test]
    fn test_workflow_add_step_rejects_duplicates() {
        let mut workflow = Workflow::new("wf", "Workflow");
        assert!(workflow.add_step(Step::shell("a", "true")).is_ok());
        assert!(workflow.add_step(Step::shell("a", "false")).is_err());
        assert_eq!(workflow.len(), 1);
    }

    #[test]
    fn test_with_input_ignored_for_non_prompt() {
        let step = Step::shell("s", "echo").with_input("x", "y");
        assert_eq!(step.kind, StepKind::Shell(ShellStep { command: "echo".into() }));
    }
}
