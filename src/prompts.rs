//! Prompt Library
//!
//! Lookup and rendering of stored prompts for `prompt` steps. Prompts
//! flagged as templates contain `{{name}}` placeholders that are filled
//! from the step's resolved inputs.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use async_trait::async_trait;
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::PromptError;

/// Matches `{{ name }}` placeholders.
static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*([\w.]+)\s*\}\}").expect("placeholder pattern is valid")
});

/// A stored prompt.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PromptDefinition {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    pub content: String,

    #[serde(default)]
    pub is_template: bool,

    /// Declared variable names; derived from `content` when empty
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<String>,
}

impl PromptDefinition {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            content: content.into(),
            is_template: false,
            variables: Vec::new(),
        }
    }

    /// Creates a template prompt, deriving its variables from the content.
    pub fn template(id: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        let variables = extract_variables(&content);
        Self {
            is_template: true,
            variables,
            ..Self::new(id, content)
        }
    }
}

/// Source of prompts for the prompt step executor.
#[async_trait]
pub trait PromptSource: Send + Sync {
    async fn get_prompt(&self, id: &str) -> Result<PromptDefinition, PromptError>;

    /// Renders a prompt with the given variables.
    ///
    /// Non-template prompts are returned verbatim.
    async fn render(
        &self,
        prompt: &PromptDefinition,
        variables: &BTreeMap<String, String>,
    ) -> Result<String, PromptError> {
        if !prompt.is_template {
            return Ok(prompt.content.clone());
        }
        render_template(&prompt.content, variables)
    }
}

/// Placeholder names in order of first appearance.
pub fn extract_variables(content: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in PLACEHOLDER.captures_iter(content) {
        let name = caps[1].to_string();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// Replaces every `{{name}}` placeholder.
///
/// Fails with [`PromptError::MissingVariables`] if any placeholder has no
/// value, listing each missing name once.
pub fn render_template(
    content: &str,
    variables: &BTreeMap<String, String>,
) -> Result<String, PromptError> {
    let missing: Vec<String> = extract_variables(content)
        .into_iter()
        .filter(|name| !variables.contains_key(name))
        .collect();
    if !missing.is_empty() {
        return Err(PromptError::MissingVariables(missing));
    }

    let rendered = PLACEHOLDER.replace_all(content, |caps: &Captures| {
        variables
            .get(&caps[1])
            .cloned()
            .unwrap_or_default()
    });
    Ok(rendered.into_owned())
}

/// In-memory prompt collection, optionally seeded from a directory.
#[derive(Default)]
pub struct PromptLibrary {
    prompts: RwLock<HashMap<String, PromptDefinition>>,
}

impl PromptLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, prompt: PromptDefinition) {
        debug!("Registered prompt '{}'", prompt.id);
        self.prompts.write().await.insert(prompt.id.clone(), prompt);
    }

    /// Loads every `.json`, `.yaml` and `.yml` file in `dir` as a prompt.
    ///
    /// Returns the number of prompts loaded.
    pub async fn load_dir(&self, dir: impl AsRef<Path>) -> Result<usize, PromptError> {
        let dir = dir.as_ref();
        let mut entries = tokio::fs::read_dir(dir).await?;
        let mut loaded = 0;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let ext = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.to_ascii_lowercase());

            let parsed: Result<PromptDefinition, String> = match ext.as_deref() {
                Some("json") => {
                    let content = tokio::fs::read_to_string(&path).await?;
                    serde_json::from_str(&content).map_err(|e| e.to_string())
                }
                Some("yaml") | Some("yml") => {
                    let content = tokio::fs::read_to_string(&path).await?;
                    serde_yaml::from_str(&content).map_err(|e| e.to_string())
                }
                _ => continue,
            };

            let mut prompt = parsed.map_err(|message| PromptError::Load {
                path: path.display().to_string(),
                message,
            })?;
            if prompt.is_template && prompt.variables.is_empty() {
                prompt.variables = extract_variables(&prompt.content);
            }
            self.insert(prompt).await;
            loaded += 1;
        }

        if loaded == 0 {
            warn!("No prompts found in {}", dir.display());
        } else {
            info!("Loaded {} prompts from {}", loaded, dir.display());
        }
        Ok(loaded)
    }
}

#[async_trait]
impl PromptSource for PromptLibrary {
    async fn get_prompt(&self, id: &str) -> Result<PromptDefinition, PromptError> {
        self.prompts
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| PromptError::NotFound(id.to_string()))
    }
}
