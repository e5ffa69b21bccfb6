//! Shell Step Execution
//!
//! Commands run through `sh -c`, either inside a disposable container
//! (`<runtime> run --rm --network none <image> sh -c <command>`) or, when
//! explicitly allowed, directly on the host.
//!
//! # Container Runtime Resolution
//!
//! 1. `shell.container_runtime` from the configuration
//! 2. `docker` on the system PATH
//! 3. `podman` on the system PATH

use std::path::PathBuf;
use std::process::{Command as StdCommand, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use tokio::process::Command;

use super::step::{StepExecutor, StepResult};
use crate::config::ShellConfig;
use crate::workflow::{ShellStep, WorkflowContext};

/// Hard limit for a single command.
pub const SHELL_TIMEOUT: Duration = Duration::from_secs(60);

/// Lazily-resolved container runtime on the system PATH.
pub static CONTAINER_RUNTIME: Lazy<Option<PathBuf>> = Lazy::new(|| {
    for candidate in ["docker", "podman"] {
        if let Ok(output) = StdCommand::new("which").arg(candidate).output() {
            if output.status.success() {
                let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !path.is_empty() {
                    info!("Using container runtime: {}", path);
                    return Some(PathBuf::from(path));
                }
            }
        }
    }
    debug!("No container runtime found on PATH");
    None
});

/// Where commands are allowed to run.
#[derive(Debug, Clone, PartialEq)]
pub enum ShellMode {
    Sandboxed { runtime: PathBuf, image: String },
    Host,
    Disabled { reason: String },
}

#[derive(Debug, Clone)]
pub struct ShellExecutor {
    mode: ShellMode,
    timeout: Duration,
}

impl ShellExecutor {
    pub fn new(mode: ShellMode) -> Self {
        Self {
            mode,
            timeout: SHELL_TIMEOUT,
        }
    }

    /// Runs commands directly on the host.
    pub fn host() -> Self {
        Self::new(ShellMode::Host)
    }

    /// Picks the mode from configuration.
    ///
    /// A configured sandbox image always wins. Without one, host execution
    /// happens only if `allow_unsandboxed` is set.
    pub fn from_config(config: &ShellConfig) -> Self {
        let mode = match (&config.sandbox_image, config.allow_unsandboxed) {
            (Some(image), _) => {
                let runtime = config
                    .container_runtime
                    .as_ref()
                    .map(PathBuf::from)
                    .or_else(|| CONTAINER_RUNTIME.clone());
                match runtime {
                    Some(runtime) => ShellMode::Sandboxed {
                        runtime,
                        image: image.clone(),
                    },
                    None => ShellMode::Disabled {
                        reason: format!(
                            "sandbox image '{}' is configured but no container runtime was found",
                            image
                        ),
                    },
                }
            }
            (None, true) => ShellMode::Host,
            (None, false) => ShellMode::Disabled {
                reason: "no sandbox image configured and unsandboxed execution is not allowed"
                    .to_string(),
            },
        };
        Self::new(mode)
    }

    pub fn mode(&self) -> &ShellMode {
        &self.mode
    }

    /// Program and arguments used to run `command`.
    pub fn invocation(&self, command: &str) -> Result<(String, Vec<String>), String> {
        match &self.mode {
            ShellMode::Sandboxed { runtime, image } => Ok((
                runtime.display().to_string(),
                vec![
                    "run".into(),
                    "--rm".into(),
                    "--network".into(),
                    "none".into(),
                    image.clone(),
                    "sh".into(),
                    "-c".into(),
                    command.to_string(),
                ],
            )),
            ShellMode::Host => Ok(("sh".into(), vec!["-c".into(), command.to_string()])),
            ShellMode::Disabled { reason } => {
                Err(format!("Shell execution is disabled: {}", reason))
            }
        }
    }
}

#[async_trait]
impl StepExecutor for ShellExecutor {
    type Step = ShellStep;

    async fn run_step(&self, step: &ShellStep, _context: &WorkflowContext) -> StepResult {
        let (program, args) = match self.invocation(&step.command) {
            Ok(invocation) => invocation,
            Err(message) => return StepResult::failed(message),
        };

        if self.mode == ShellMode::Host {
            warn!("Running shell command without a sandbox: {}", step.command);
        }
        debug!("Executing: {} {:?}", program, args);

        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Err(_) => {
                return StepResult::failed(format!(
                    "Command timed out after {}s",
                    self.timeout.as_secs()
                ))
            }
            Ok(Err(e)) => return StepResult::failed(format!("Failed to start '{}': {}", program, e)),
            Ok(Ok(output)) => output,
        };

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            debug!("stderr:\n{}", stderr);
            return StepResult::failed(stderr.into_owned());
        }

        if !output.status.success() {
            return StepResult::failed(match output.status.code() {
                Some(code) => format!("Command exited with status {}", code),
                None => "Command terminated by signal".to_string(),
            });
        }

        StepResult::ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
