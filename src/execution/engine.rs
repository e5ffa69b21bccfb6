//! Workflow Execution Engine
//!
//! The persisted state machine that drives one execution at a time:
//! - Condition evaluation and step dispatch
//! - Per-step timeouts and failure policy
//! - Concurrent fan-out of `parallel` blocks
//! - Checkpointing after every transition
//! - Pause at `human-approval` steps and resume by execution id
//! - Immutable stored definitions, runnable by id
//! - Per-caller admission control and audit events

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::http::HttpExecutor;
use super::prompt::PromptExecutor;
use super::shell::ShellExecutor;
use super::step::{StepExecutor, StepResult};
use crate::admission::AdmissionController;
use crate::audit::{AuditEventType, AuditLogger, FileAuditLog};
use crate::config::EngineConfig;
use crate::error::WorkflowError;
use crate::prompts::PromptSource;
use crate::store::StateStore;
use crate::workflow::{
    evaluate_condition, validate_definition, ErrorPolicy, ExecutionStatus, HistoryEntry,
    ParallelStep, Step, StepKind, Workflow, WorkflowContext, WorkflowExecutionState,
    DEFAULT_STEP_TIMEOUT_MS,
};

/// Caller id used by [`WorkflowEngine::run_workflow`] and
/// [`WorkflowEngine::resume_workflow`].
pub const DEFAULT_CALLER: &str = "anonymous";

/// What a `run`/`resume` call reports back.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunWorkflowResult {
    pub success: bool,
    pub message: String,

    /// Final context on completion, partial context on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<WorkflowContext>,

    pub execution_id: String,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub paused: bool,

    /// Text shown to the approver of a paused execution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,

    /// Step the execution is paused on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
}

/// Result of one loop iteration.
enum Transition {
    /// Move the cursor; `None` completes the execution
    Advance(Option<String>),
    /// Like `Advance`, but nothing ran because the condition was false
    Skip(Option<String>),
    Fail { message: String },
    Pause { step_id: String, prompt: String },
}

/// A finished leaf step.
struct LeafRun {
    result: StepResult,
    finished_at: DateTime<Utc>,
    duration_ms: u64,
}

impl LeafRun {
    fn immediate(result: StepResult) -> Self {
        Self {
            result,
            finished_at: Utc::now(),
            duration_ms: 0,
        }
    }

    fn history_entry(&self, step_id: &str) -> HistoryEntry {
        HistoryEntry {
            step_id: step_id.to_string(),
            executed_at: self.finished_at,
            success: self.result.success,
            output: if self.result.success {
                self.result.output.clone()
            } else {
                None
            },
            error: if self.result.success {
                None
            } else {
                Some(self.result.error_message())
            },
            duration_ms: Some(self.duration_ms),
        }
    }
}

/// Workflow execution engine.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use promptflow::execution::{ShellExecutor, WorkflowEngine};
/// use promptflow::prompts::PromptLibrary;
/// use promptflow::store::MemoryStateStore;
/// use promptflow::workflow::{Step, Workflow};
///
/// # async fn demo() -> Result<(), promptflow::WorkflowError> {
/// let engine = WorkflowEngine::new(
///     Arc::new(MemoryStateStore::new()),
///     Arc::new(PromptLibrary::new()),
/// )
/// .with_shell(ShellExecutor::host());
///
/// let workflow = Workflow::from_steps("hello", vec![Step::shell("s1", "echo hi").with_output("o1")]);
/// let result = engine.run_workflow(&workflow, Default::default()).await?;
/// assert!(result.success);
/// # Ok(())
/// # }
/// ```
pub struct WorkflowEngine {
    store: Arc<dyn StateStore>,
    prompt: PromptExecutor,
    shell: ShellExecutor,
    http: HttpExecutor,
    audit: AuditLogger,
    admission: Arc<AdmissionController>,
    default_timeout_ms: u64,
}

impl WorkflowEngine {
    /// Creates an engine with shell execution disabled and auditing off.
    pub fn new(store: Arc<dyn StateStore>, prompts: Arc<dyn PromptSource>) -> Self {
        Self {
            store,
            prompt: PromptExecutor::new(prompts),
            shell: ShellExecutor::from_config(&Default::default()),
            http: HttpExecutor::new(),
            audit: AuditLogger::disabled(),
            admission: Arc::new(AdmissionController::default()),
            default_timeout_ms: DEFAULT_STEP_TIMEOUT_MS,
        }
    }

    /// Creates an engine wired from configuration.
    ///
    /// An audit log that cannot be opened is reported and disabled.
    pub fn from_config(
        config: &EngineConfig,
        store: Arc<dyn StateStore>,
        prompts: Arc<dyn PromptSource>,
    ) -> Self {
        let audit = match FileAuditLog::open(&config.audit_log) {
            Ok(log) => AuditLogger::new(log),
            Err(e) => {
                warn!(
                    "Audit log {} unavailable, auditing disabled: {}",
                    config.audit_log.display(),
                    e
                );
                AuditLogger::disabled()
            }
        };

        Self::new(store, prompts)
            .with_shell(ShellExecutor::from_config(&config.shell))
            .with_audit(audit)
            .with_admission(Arc::new(AdmissionController::new(
                config.max_concurrent_workflows,
            )))
            .with_default_timeout_ms(config.default_step_timeout_ms)
    }

    pub fn with_shell(mut self, shell: ShellExecutor) -> Self {
        self.shell = shell;
        self
    }

    pub fn with_http(mut self, http: HttpExecutor) -> Self {
        self.http = http;
        self
    }

    pub fn with_audit(mut self, audit: AuditLogger) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_admission(mut self, admission: Arc<AdmissionController>) -> Self {
        self.admission = admission;
        self
    }

    /// Budget for steps that declare no `timeout`.
    pub fn with_default_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.default_timeout_ms = timeout_ms;
        self
    }

    pub fn admission(&self) -> &Arc<AdmissionController> {
        &self.admission
    }

    /// Runs a workflow on behalf of [`DEFAULT_CALLER`].
    pub async fn run_workflow(
        &self,
        workflow: &Workflow,
        initial_context: WorkflowContext,
    ) -> Result<RunWorkflowResult, WorkflowError> {
        self.run_workflow_as(DEFAULT_CALLER, workflow, initial_context)
            .await
    }

    /// Validates, admits, persists and runs a new execution.
    ///
    /// Caller-supplied values override the workflow's default variables.
    pub async fn run_workflow_as(
        &self,
        caller: &str,
        workflow: &Workflow,
        initial_context: WorkflowContext,
    ) -> Result<RunWorkflowResult, WorkflowError> {
        validate(workflow)?;

        let _permit = self.admission.acquire(caller).ok_or_else(|| {
            WorkflowError::AdmissionRejected {
                caller: caller.to_string(),
                limit: self.admission.max_concurrent(),
            }
        })?;

        self.store_definition(workflow).await?;

        let mut context = workflow.variables.clone();
        context.extend(initial_context);

        let state = WorkflowExecutionState::new(
            workflow.id.clone(),
            workflow.version,
            context,
            workflow.first_step_id(),
        );
        self.store.save_state(&state).await?;

        info!(
            "Starting execution {} of workflow '{}' v{} ({} steps)",
            state.execution_id,
            workflow.id,
            workflow.version,
            workflow.len()
        );
        self.audit
            .log(
                caller,
                &workflow.id,
                AuditEventType::Start,
                Some(json!({ "executionId": state.execution_id })),
            )
            .await;

        self.drive(workflow, state, caller).await
    }

    /// Validates and stores a definition without running it.
    ///
    /// Storing the same content again is a no-op; different content under an
    /// existing `(id, version)` is a [`WorkflowError::DefinitionConflict`].
    pub async fn save_workflow(&self, workflow: &Workflow) -> Result<(), WorkflowError> {
        validate(workflow)?;
        self.store_definition(workflow).await?;
        info!("Saved workflow '{}' v{}", workflow.id, workflow.version);
        Ok(())
    }

    /// Loads a stored definition; `None` picks the latest version.
    pub async fn get_workflow(
        &self,
        workflow_id: &str,
        version: Option<u32>,
    ) -> Result<Workflow, WorkflowError> {
        let version = match version {
            Some(version) => version,
            None => self
                .store
                .list_workflow_versions(workflow_id)
                .await?
                .last()
                .copied()
                .ok_or_else(|| WorkflowError::WorkflowNotFound(workflow_id.to_string()))?,
        };

        self.store
            .get_workflow(workflow_id, version)
            .await?
            .ok_or_else(|| WorkflowError::DefinitionNotFound {
                workflow_id: workflow_id.to_string(),
                version,
            })
    }

    /// Runs a stored definition on behalf of [`DEFAULT_CALLER`].
    pub async fn run_stored_workflow(
        &self,
        workflow_id: &str,
        version: Option<u32>,
        initial_context: WorkflowContext,
    ) -> Result<RunWorkflowResult, WorkflowError> {
        self.run_stored_workflow_as(DEFAULT_CALLER, workflow_id, version, initial_context)
            .await
    }

    /// Runs a stored definition by id, the latest version unless one is given.
    pub async fn run_stored_workflow_as(
        &self,
        caller: &str,
        workflow_id: &str,
        version: Option<u32>,
        initial_context: WorkflowContext,
    ) -> Result<RunWorkflowResult, WorkflowError> {
        let workflow = self.get_workflow(workflow_id, version).await?;
        self.run_workflow_as(caller, &workflow, initial_context)
            .await
    }

    /// Stored definitions are immutable so that resumed executions see the
    /// definition they started with.
    async fn store_definition(&self, workflow: &Workflow) -> Result<(), WorkflowError> {
        match self.store.get_workflow(&workflow.id, workflow.version).await? {
            Some(existing) if existing == *workflow => Ok(()),
            Some(_) => Err(WorkflowError::DefinitionConflict {
                workflow_id: workflow.id.clone(),
                version: workflow.version,
            }),
            None => Ok(self.store.save_workflow(workflow).await?),
        }
    }

    /// Resumes an execution on behalf of [`DEFAULT_CALLER`].
    pub async fn resume_workflow(
        &self,
        execution_id: &str,
        input: Option<Value>,
    ) -> Result<RunWorkflowResult, WorkflowError> {
        self.resume_workflow_as(DEFAULT_CALLER, execution_id, input)
            .await
    }

    /// Continues a persisted execution from its cursor.
    ///
    /// A `paused` execution needs `input`, which becomes the result of the
    /// approval step it is paused on. Terminal executions are rejected
    /// without being touched.
    pub async fn resume_workflow_as(
        &self,
        caller: &str,
        execution_id: &str,
        input: Option<Value>,
    ) -> Result<RunWorkflowResult, WorkflowError> {
        let mut state = self
            .store
            .get_state(execution_id)
            .await?
            .ok_or_else(|| WorkflowError::ExecutionNotFound(execution_id.to_string()))?;

        if state.is_terminal() {
            return Err(WorkflowError::InvalidState {
                execution_id: execution_id.to_string(),
                reason: format!("execution is already {}", state.status),
            });
        }

        let workflow = self
            .store
            .get_workflow(&state.workflow_id, state.workflow_version)
            .await?
            .ok_or_else(|| WorkflowError::DefinitionNotFound {
                workflow_id: state.workflow_id.clone(),
                version: state.workflow_version,
            })?;

        let approval_input = match (state.status, input) {
            (ExecutionStatus::Paused, Some(input)) => Some(input),
            (ExecutionStatus::Paused, None) => {
                return Err(WorkflowError::InvalidState {
                    execution_id: execution_id.to_string(),
                    reason: "a paused execution must be resumed with an input value".to_string(),
                })
            }
            (_, Some(_)) => {
                debug!("Ignoring resume input for running execution {}", execution_id);
                None
            }
            (_, None) => None,
        };

        let _permit = self.admission.acquire(caller).ok_or_else(|| {
            WorkflowError::AdmissionRejected {
                caller: caller.to_string(),
                limit: self.admission.max_concurrent(),
            }
        })?;

        if let Some(input) = approval_input {
            let approval = state
                .current_step_id
                .as_deref()
                .and_then(|id| workflow.get_step(id));
            if let Some(step) = approval {
                info!("Step '{}' approved", step.id);
                state.record(LeafRun::immediate(StepResult::ok(input.clone())).history_entry(&step.id));
                if let Some(key) = &step.output {
                    state.context.insert(key.clone(), input);
                }
                state.current_step_id = success_target(&workflow, step);
            }
        }

        state.mark_running();
        self.store.save_state(&state).await?;

        info!(
            "Resuming execution {} of workflow '{}' at {:?}",
            state.execution_id, state.workflow_id, state.current_step_id
        );
        self.audit
            .log(
                caller,
                &state.workflow_id,
                AuditEventType::Resume,
                Some(json!({
                    "executionId": state.execution_id,
                    "stepId": state.current_step_id,
                })),
            )
            .await;

        self.drive(&workflow, state, caller).await
    }

    /// Loads a persisted execution.
    pub async fn get_execution(
        &self,
        execution_id: &str,
    ) -> Result<WorkflowExecutionState, WorkflowError> {
        self.store
            .get_state(execution_id)
            .await?
            .ok_or_else(|| WorkflowError::ExecutionNotFound(execution_id.to_string()))
    }

    /// All executions of a workflow, oldest first.
    pub async fn list_executions(
        &self,
        workflow_id: &str,
    ) -> Result<Vec<WorkflowExecutionState>, WorkflowError> {
        Ok(self.store.list_states(workflow_id).await?)
    }

    /// Advances `state` until it completes, fails or pauses.
    async fn drive(
        &self,
        workflow: &Workflow,
        mut state: WorkflowExecutionState,
        caller: &str,
    ) -> Result<RunWorkflowResult, WorkflowError> {
        // Steps skipped since the last step that ran. Skipping never changes
        // the context, so meeting one of them again is an endless loop.
        let mut skipped: HashSet<String> = HashSet::new();

        while let Some(step_id) = state.current_step_id.clone() {
            let transition = match workflow.get_step(&step_id) {
                None => {
                    let error = WorkflowError::StepNotFound(step_id.clone()).to_string();
                    error!("{}", error);
                    state.record(
                        LeafRun::immediate(StepResult::failed(error.clone()))
                            .history_entry(&step_id),
                    );
                    Transition::Fail { message: error }
                }
                Some(step) => match &step.kind {
                    StepKind::Parallel(block) => {
                        self.run_parallel(workflow, step, block, &mut state, caller)
                            .await
                    }
                    StepKind::HumanApproval(approval) => {
                        match evaluate_step_condition(step, &state.context) {
                            Ok(false) => {
                                info!("Skipping step '{}': condition is false", step.id);
                                Transition::Skip(success_target(workflow, step))
                            }
                            Ok(true) => Transition::Pause {
                                step_id: step.id.clone(),
                                prompt: approval.prompt.clone(),
                            },
                            Err(e) => {
                                let run = LeafRun::immediate(StepResult::failed(e));
                                self.settle_leaf(workflow, step, run, &mut state, caller)
                                    .await
                            }
                        }
                    }
                    _ => self.run_leaf(workflow, step, &mut state, caller).await,
                },
            };

            match transition {
                Transition::Advance(next) => {
                    skipped.clear();
                    state.current_step_id = next;
                    state.touch();
                    self.store.save_state(&state).await?;
                }
                Transition::Skip(next) => {
                    if !skipped.insert(step_id.clone()) {
                        let message = format!(
                            "Step '{}' was skipped again before any step ran; its branches form a loop",
                            step_id
                        );
                        return self.finish_failed(state, caller, message).await;
                    }
                    state.current_step_id = next;
                    state.touch();
                    self.store.save_state(&state).await?;
                }
                Transition::Fail { message } => {
                    return self.finish_failed(state, caller, message).await;
                }
                Transition::Pause { step_id, prompt } => {
                    state.mark_paused();
                    self.store.save_state(&state).await?;
                    info!(
                        "Execution {} paused at '{}' awaiting approval",
                        state.execution_id, step_id
                    );
                    self.audit
                        .log(
                            caller,
                            &state.workflow_id,
                            AuditEventType::Paused,
                            Some(json!({ "executionId": state.execution_id, "stepId": step_id })),
                        )
                        .await;
                    return Ok(RunWorkflowResult {
                        success: true,
                        message: format!("Workflow paused at step {} awaiting input", step_id),
                        outputs: None,
                        execution_id: state.execution_id,
                        paused: true,
                        prompt: Some(prompt),
                        step_id: Some(step_id),
                    });
                }
            }
        }

        state.mark_completed();
        self.store.save_state(&state).await?;
        info!(
            "Execution {} completed ({} history entries)",
            state.execution_id,
            state.history.len()
        );
        self.audit
            .log(
                caller,
                &state.workflow_id,
                AuditEventType::Completed,
                Some(json!({ "executionId": state.execution_id })),
            )
            .await;

        Ok(RunWorkflowResult {
            success: true,
            message: "Workflow completed successfully".to_string(),
            outputs: Some(state.context),
            execution_id: state.execution_id,
            paused: false,
            prompt: None,
            step_id: None,
        })
    }

    async fn finish_failed(
        &self,
        mut state: WorkflowExecutionState,
        caller: &str,
        message: String,
    ) -> Result<RunWorkflowResult, WorkflowError> {
        state.mark_failed();
        self.store.save_state(&state).await?;
        error!("Execution {} failed: {}", state.execution_id, message);
        self.audit
            .log(
                caller,
                &state.workflow_id,
                AuditEventType::Failed,
                Some(json!({
                    "executionId": state.execution_id,
                    "stepId": state.current_step_id,
                    "message": message,
                })),
            )
            .await;

        Ok(RunWorkflowResult {
            success: false,
            message,
            outputs: Some(state.context),
            execution_id: state.execution_id,
            paused: false,
            prompt: None,
            step_id: state.current_step_id,
        })
    }

    async fn run_leaf(
        &self,
        workflow: &Workflow,
        step: &Step,
        state: &mut WorkflowExecutionState,
        caller: &str,
    ) -> Transition {
        let run = match evaluate_step_condition(step, &state.context) {
            Ok(false) => {
                info!("Skipping step '{}': condition is false", step.id);
                return Transition::Skip(success_target(workflow, step));
            }
            Ok(true) => self.execute_leaf(step, &state.context).await,
            Err(e) => LeafRun::immediate(StepResult::failed(e)),
        };
        self.settle_leaf(workflow, step, run, state, caller).await
    }

    /// Records a leaf outcome and applies the step's failure policy.
    async fn settle_leaf(
        &self,
        workflow: &Workflow,
        step: &Step,
        run: LeafRun,
        state: &mut WorkflowExecutionState,
        caller: &str,
    ) -> Transition {
        state.record(run.history_entry(&step.id));

        if run.result.success {
            info!("Step '{}' completed successfully", step.id);
            if let Some(key) = &step.output {
                state
                    .context
                    .insert(key.clone(), run.result.output.unwrap_or(Value::Null));
            }
            return Transition::Advance(success_target(workflow, step));
        }

        let error = run.result.error_message();
        error!("Step '{}' failed: {}", step.id, error);
        self.audit_step_failure(caller, state, &step.id, &error)
            .await;

        match step.error_policy {
            ErrorPolicy::Continue => {
                let next = step
                    .on_failure
                    .clone()
                    .or_else(|| workflow.next_step_id(&step.id));
                warn!("Continuing past failed step '{}' to {:?}", step.id, next);
                Transition::Advance(next)
            }
            ErrorPolicy::Fail => Transition::Fail {
                message: step_failed_message(&step.id, error),
            },
        }
    }

    async fn run_parallel(
        &self,
        workflow: &Workflow,
        step: &Step,
        block: &ParallelStep,
        state: &mut WorkflowExecutionState,
        caller: &str,
    ) -> Transition {
        match evaluate_step_condition(step, &state.context) {
            Ok(true) => {}
            Ok(false) => {
                info!("Skipping parallel block '{}': condition is false", step.id);
                return Transition::Skip(success_target(workflow, step));
            }
            Err(e) => {
                let run = LeafRun::immediate(StepResult::failed(e));
                state.record(run.history_entry(&step.id));
                let error = run.result.error_message();
                self.audit_step_failure(caller, state, &step.id, &error)
                    .await;
                return block_failure(step, &step.id, error);
            }
        }

        info!(
            "Starting parallel block '{}' ({} steps)",
            step.id,
            block.steps.len()
        );

        let snapshot = &state.context;
        let runs = block.steps.iter().map(|sub| async move {
            match evaluate_step_condition(sub, snapshot) {
                Ok(false) => {
                    debug!("Skipping step '{}': condition is false", sub.id);
                    None
                }
                Ok(true) => Some(self.execute_leaf(sub, snapshot).await),
                Err(e) => Some(LeafRun::immediate(StepResult::failed(e))),
            }
        });
        let outcomes = join_all(runs).await;

        let mut first_failure: Option<(String, String)> = None;
        let mut outputs = Vec::new();

        for (sub, outcome) in block.steps.iter().zip(outcomes) {
            let Some(run) = outcome else { continue };
            state.record(run.history_entry(&sub.id));

            if run.result.success {
                if let Some(key) = &sub.output {
                    outputs.push((key.clone(), run.result.output.unwrap_or(Value::Null)));
                }
            } else {
                let error = run.result.error_message();
                error!("Step '{}' failed: {}", sub.id, error);
                self.audit_step_failure(caller, state, &sub.id, &error)
                    .await;
                first_failure.get_or_insert((sub.id.clone(), error));
            }
        }

        if let Some((failed_id, error)) = first_failure {
            return block_failure(step, &failed_id, error);
        }

        state.context.extend(outputs);
        info!("Parallel block '{}' completed successfully", step.id);
        Transition::Advance(success_target(workflow, step))
    }

    /// Runs one leaf step bounded by its timeout.
    async fn execute_leaf(&self, step: &Step, context: &WorkflowContext) -> LeafRun {
        let timeout_ms = step.timeout_ms(self.default_timeout_ms);
        debug!("Starting step: {} ({}, {}ms budget)", step.id, step.type_name(), timeout_ms);

        let started = Instant::now();
        let result = match tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            self.dispatch(step, context),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => StepResult::failed(
                WorkflowError::StepTimeout {
                    step_id: step.id.clone(),
                    timeout_ms,
                }
                .to_string(),
            ),
        };

        LeafRun {
            result,
            finished_at: Utc::now(),
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    async fn dispatch(&self, step: &Step, context: &WorkflowContext) -> StepResult {
        match &step.kind {
            StepKind::Prompt(prompt) => self.prompt.run_step(prompt, context).await,
            StepKind::Shell(shell) => self.shell.run_step(shell, context).await,
            StepKind::Http(http) => self.http.run_step(http, context).await,
            StepKind::Parallel(_) | StepKind::HumanApproval(_) => StepResult::failed(format!(
                "'{}' steps cannot run inside a parallel block",
                step.type_name()
            )),
        }
    }

    async fn audit_step_failure(
        &self,
        caller: &str,
        state: &WorkflowExecutionState,
        step_id: &str,
        error: &str,
    ) {
        self.audit
            .log(
                caller,
                &state.workflow_id,
                AuditEventType::StepFailure,
                Some(json!({
                    "executionId": state.execution_id,
                    "stepId": step_id,
                    "error": error,
                })),
            )
            .await;
    }
}

/// `onSuccess` if declared, else the next step in document order.
fn success_target(workflow: &Workflow, step: &Step) -> Option<String> {
    step.on_success
        .clone()
        .or_else(|| workflow.next_step_id(&step.id))
}

/// A failed block branches to its `onFailure` or fails the execution.
fn block_failure(block: &Step, failed_id: &str, error: String) -> Transition {
    match &block.on_failure {
        Some(target) => {
            warn!(
                "Parallel block '{}' failed, branching to '{}'",
                block.id, target
            );
            Transition::Advance(Some(target.clone()))
        }
        None => Transition::Fail {
            message: step_failed_message(failed_id, error),
        },
    }
}

fn step_failed_message(step_id: &str, message: String) -> String {
    WorkflowError::StepExecution {
        step_id: step_id.to_string(),
        message,
    }
    .to_string()
}

fn validate(workflow: &Workflow) -> Result<(), WorkflowError> {
    validate_definition(workflow).map_err(|issues| {
        let messages: Vec<String> = issues.iter().map(|issue| issue.to_string()).collect();
        WorkflowError::Validation(messages.join("\n"))
    })
}

/// Steps without a condition always run.
fn evaluate_step_condition(step: &Step, context: &WorkflowContext) -> Result<bool, String> {
    match &step.condition {
        None => Ok(true),
        Some(source) => evaluate_condition(source, context).map_err(|e| e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompts::PromptLibrary;
    use crate::store::MemoryStateStore;
    use serde_json::Map;

    fn engine() -> (WorkflowEngine, Arc<MemoryStateStore>) {
        let store = Arc::new(MemoryStateStore::new());
        let engine = WorkflowEngine::new(store.clone(), Arc::new(PromptLibrary::new()))
            .with_shell(ShellExecutor::host());
        (engine, store)
    }

    #[test]
    fn test_success_target_prefers_on_success() {
        let workflow = Workflow::from_steps(
            "wf",
            vec![
                Step::shell("a", "echo a").on_success("c"),
                Step::shell("b", "echo b"),
                Step::shell("c", "echo c"),
            ],
        );
        assert_eq!(success_target(&workflow, &workflow.steps[0]).as_deref(), Some("c"));
        assert_eq!(success_target(&workflow, &workflow.steps[1]).as_deref(), Some("c"));
        assert_eq!(success_target(&workflow, &workflow.steps[2]), None);
    }

    #[test]
    fn test_result_serializes_camel_case() {
        let result = RunWorkflowResult {
            success: true,
            message: "ok".into(),
            outputs: None,
            execution_id: "e1".into(),
            paused: false,
            prompt: None,
            step_id: None,
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["executionId"], "e1");
        assert!(value.get("paused").is_none());
    }

    #[tokio::test]
    async fn test_invalid_definition_never_starts() {
        let (engine, store) = engine();
        let workflow = Workflow::from_steps("wf", vec![Step::shell("a", "echo").on_success("ghost")]);

        let err = engine.run_workflow(&workflow, Map::new()).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Validation(_)));
        assert_eq!(store.save_count(), 0);
    }

    #[tokio::test]
    async fn test_admission_rejection() {
        let (engine, _store) = engine();
        let engine = engine.with_admission(Arc::new(AdmissionController::new(1)));
        let _held = engine.admission().acquire("u1").unwrap();

        let workflow = Workflow::from_steps("wf", vec![Step::shell("a", "echo a")]);
        let err = engine
            .run_workflow_as("u1", &workflow, Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::AdmissionRejected { limit: 1, .. }));

        let ok = engine.run_workflow_as("u2", &workflow, Map::new()).await.unwrap();
        assert!(ok.success);
    }

    #[tokio::test]
    async fn test_permit_released_after_run() {
        let (engine, _store) = engine();
        let workflow = Workflow::from_steps("wf", vec![Step::shell("a", "false")]);

        engine.run_workflow_as("u1", &workflow, Map::new()).await.unwrap();
        assert_eq!(engine.admission().running("u1"), 0);
    }

    #[tokio::test]
    async fn test_caller_context_overrides_defaults() {
        let (engine, _store) = engine();
        let workflow = Workflow::from_steps("wf", vec![Step::shell("a", "true")])
            .with_variable("lang", "en")
            .with_variable("tone", "formal");

        let mut initial = Map::new();
        initial.insert("lang".into(), json!("fr"));
        let result = engine.run_workflow(&workflow, initial).await.unwrap();

        let outputs = result.outputs.unwrap();
        assert_eq!(outputs["lang"], json!("fr"));
        assert_eq!(outputs["tone"], json!("formal"));
    }

    #[tokio::test]
    async fn test_get_unknown_execution() {
        let (engine, _store) = engine();
        let err = engine.get_execution("nope").await.unwrap_err();
        assert!(matches!(err, WorkflowError::ExecutionNotFound(_)));
    }
}
