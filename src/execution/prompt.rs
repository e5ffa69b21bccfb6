//! Prompt Step Execution

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use serde_json::Value;

use super::step::{StepExecutor, StepResult};
use crate::prompts::PromptSource;
use crate::workflow::{PromptStep, WorkflowContext};

/// Renders stored prompts from a [`PromptSource`].
#[derive(Clone)]
pub struct PromptExecutor {
    source: Arc<dyn PromptSource>,
}

impl PromptExecutor {
    pub fn new(source: Arc<dyn PromptSource>) -> Self {
        Self { source }
    }
}

/// Text form of a context value. Strings are taken as-is.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Resolves one input value.
///
/// A string of the form `{{context.key}}` is replaced by the stringified
/// context value (empty if absent). Other strings pass through and other
/// literals are JSON-encoded.
pub fn resolve_input(value: &Value, context: &WorkflowContext) -> String {
    let Value::String(text) = value else {
        return stringify(value);
    };

    let reference = text
        .strip_prefix("{{")
        .and_then(|rest| rest.strip_suffix("}}"))
        .map(str::trim)
        .and_then(|inner| inner.strip_prefix("context."));

    match reference {
        Some(key) => context.get(key).map(stringify).unwrap_or_default(),
        None => text.clone(),
    }
}

pub fn resolve_inputs(
    input: &BTreeMap<String, Value>,
    context: &WorkflowContext,
) -> BTreeMap<String, String> {
    input
        .iter()
        .map(|(name, value)| (name.clone(), resolve_input(value, context)))
        .collect()
}

#[async_trait]
impl StepExecutor for PromptExecutor {
    type Step = PromptStep;

    async fn run_step(&self, step: &PromptStep, context: &WorkflowContext) -> StepResult {
        let variables = resolve_inputs(&step.input, context);

        let prompt = match self.source.get_prompt(&step.prompt_id).await {
            Ok(prompt) => prompt,
            Err(e) => return StepResult::failed(e.to_string()),
        };

        debug!(
            "Rendering prompt '{}' with {} variables",
            prompt.id,
            variables.len()
        );
        match self.source.render(&prompt, &variables).await {
            Ok(content) => StepResult::ok(content),
            Err(e) => StepResult::failed(e.to_string()),
        }
    }
}
