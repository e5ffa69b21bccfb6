//! Engine Configuration
//!
//! Settings are read from an optional YAML file, then overridden by
//! environment variables. The CLI applies its own flags last.
//!
//! ```yaml
//! max_concurrent_workflows: 3
//! default_step_timeout_ms: 60000
//! state_dir: .promptflow
//! audit_log: logs/workflow-audit.log
//! prompts_dir: prompts
//! shell:
//!   sandbox_image: alpine:3.20
//!   allow_unsandboxed: false
//! ```

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::admission::DEFAULT_MAX_CONCURRENT;
use crate::error::ConfigError;
use crate::workflow::DEFAULT_STEP_TIMEOUT_MS;

pub const ENV_MAX_CONCURRENT: &str = "WORKFLOW_MAX_CONCURRENT";
pub const ENV_STEP_TIMEOUT_MS: &str = "WORKFLOW_STEP_TIMEOUT_MS";
pub const ENV_STATE_DIR: &str = "WORKFLOW_STATE_DIR";
pub const ENV_AUDIT_LOG: &str = "WORKFLOW_AUDIT_LOG";
pub const ENV_PROMPTS_DIR: &str = "WORKFLOW_PROMPTS_DIR";
pub const ENV_SANDBOX_IMAGE: &str = "SHELL_SANDBOX_IMAGE";
pub const ENV_ALLOW_UNSANDBOXED: &str = "SHELL_ALLOW_UNSANDBOXED";
pub const ENV_CONTAINER_RUNTIME: &str = "SHELL_CONTAINER_RUNTIME";

/// How `shell` steps are allowed to run.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ShellConfig {
    /// Container image used to sandbox commands
    pub sandbox_image: Option<String>,

    /// Permit running commands directly on the host
    pub allow_unsandboxed: bool,

    /// `docker`, `podman`, ...; detected on PATH when unset
    pub container_runtime: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub max_concurrent_workflows: usize,
    pub default_step_timeout_ms: u64,
    pub state_dir: PathBuf,
    pub audit_log: PathBuf,
    pub prompts_dir: Option<PathBuf>,
    pub shell: ShellConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_workflows: DEFAULT_MAX_CONCURRENT,
            default_step_timeout_ms: DEFAULT_STEP_TIMEOUT_MS,
            state_dir: PathBuf::from(".promptflow"),
            audit_log: PathBuf::from("logs/workflow-audit.log"),
            prompts_dir: None,
            shell: ShellConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Reads a YAML config file. Missing keys take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Applies overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    /// Applies overrides from an arbitrary variable lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_MAX_CONCURRENT) {
            self.max_concurrent_workflows = parse_number(ENV_MAX_CONCURRENT, &value)?;
        }
        if let Some(value) = lookup(ENV_STEP_TIMEOUT_MS) {
            self.default_step_timeout_ms = parse_number(ENV_STEP_TIMEOUT_MS, &value)?;
        }
        if let Some(value) = lookup(ENV_STATE_DIR) {
            self.state_dir = PathBuf::from(value);
        }
        if let Some(value) = lookup(ENV_AUDIT_LOG) {
            self.audit_log = PathBuf::from(value);
        }
        if let Some(value) = lookup(ENV_PROMPTS_DIR) {
            self.prompts_dir = Some(PathBuf::from(value));
        }
        if let Some(value) = lookup(ENV_SANDBOX_IMAGE) {
            self.shell.sandbox_image = non_empty(value);
        }
        if let Some(value) = lookup(ENV_ALLOW_UNSANDBOXED) {
            self.shell.allow_unsandboxed = parse_flag(ENV_ALLOW_UNSANDBOXED, &value)?;
        }
        if let Some(value) = lookup(ENV_CONTAINER_RUNTIME) {
            self.shell.container_runtime = non_empty(value);
        }
        Ok(())
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_concurrent_workflows, 3);
        assert_eq!(config.default_step_timeout_ms, 60_000);
        assert_eq!(config.audit_log, PathBuf::from("logs/workflow-audit.log"));
        assert!(!config.shell.allow_unsandboxed);
        assert!(config.shell.sandbox_image.is_none());
    }

    #[test]
    fn test_load_partial_yaml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "max_concurrent_workflows: 5\nshell:\n  sandbox_image: alpine:3.20\n",
        )
        .unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.max_concurrent_workflows, 5);
        assert_eq!(config.shell.sandbox_image.as_deref(), Some("alpine:3.20"));
        assert_eq!(config.default_step_timeout_ms, 60_000);
    }

    #[test]
    fn test_load_errors() {
        let missing = EngineConfig::load("/nonexistent/config.yaml");
        assert!(matches!(missing, Err(ConfigError::Read { .. })));

        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.yaml");
        fs::write(&path, "max_concurrent_workflows: [").unwrap();
        assert!(matches!(EngineConfig::load(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_overrides() {
        let mut config = EngineConfig::default();
        config
            .apply_overrides(lookup(&[
                (ENV_MAX_CONCURRENT, "7"),
                (ENV_STEP_TIMEOUT_MS, "1500"),
                (ENV_STATE_DIR, "/var/lib/flows"),
                (ENV_ALLOW_UNSANDBOXED, "yes"),
                (ENV_SANDBOX_IMAGE, "  "),
            ]))
            .unwrap();

        assert_eq!(config.max_concurrent_workflows, 7);
        assert_eq!(config.default_step_timeout_ms, 1500);
        assert_eq!(config.state_dir, PathBuf::from("/var/lib/flows"));
        assert!(config.shell.allow_unsandboxed);
        assert!(config.shell.sandbox_image.is_none());
    }

    #[test]
    fn test_invalid_override() {
        let mut config = EngineConfig::default();
        let err = config
            .apply_overrides(lookup(&[(ENV_MAX_CONCURRENT, "many")]))
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid value for WORKFLOW_MAX_CONCURRENT: 'many'");

        let err = config
            .apply_overrides(lookup(&[(ENV_ALLOW_UNSANDBOXED, "maybe")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { .. }));
    }
}
