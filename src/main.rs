//! promptflow CLI Entry Point
//!
//! # Usage
//!
//! ```bash
//! # Execute a workflow
//! promptflow run workflow.yaml --var topic=rust
//!
//! # Store a definition, then run it by id (latest version by default)
//! promptflow save workflow.yaml
//! promptflow run --id summarize --version 2
//!
//! # Approve a paused execution
//! promptflow resume 3f1c... --input '"approved"'
//!
//! # Check a definition without running it
//! promptflow validate workflow.yaml
//!
//! # Inspect executions
//! promptflow status 3f1c...
//! promptflow list summarize
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;
use log::{debug, error, info};
use serde_json::Value;

use promptflow::monitoring::ExecutionTimeline;
use promptflow::prompts::PromptLibrary;
use promptflow::store::FileStateStore;
use promptflow::workflow::{load_workflow, Workflow, WorkflowContext};
use promptflow::{
    EngineConfig, ExecutionStatus, RunWorkflowResult, WorkflowEngine, WorkflowExecutionState,
    APP_NAME, VERSION,
};

#[derive(Parser, Debug)]
#[command(name = "promptflow", version)]
#[command(about = "Persisted workflow execution engine for prompt orchestration", long_about = None)]
struct Cli {
    /// Path to a YAML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Directory holding execution state
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    /// Directory of prompt files (.json / .yaml)
    #[arg(long, global = true)]
    prompts_dir: Option<PathBuf>,

    /// Run shell steps inside this container image
    #[arg(long, global = true)]
    sandbox_image: Option<String>,

    /// Allow shell steps to run directly on the host
    #[arg(long, global = true)]
    allow_unsandboxed: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Execute a workflow file, or a stored workflow by id
    Run {
        /// Path to workflow YAML or JSON file
        #[arg(required_unless_present = "id")]
        file: Option<PathBuf>,

        /// Run a stored workflow instead of a file
        #[arg(long, conflicts_with = "file")]
        id: Option<String>,

        /// Stored version to run (defaults to the latest)
        #[arg(long, requires = "id")]
        version: Option<u32>,

        /// Initial context value (KEY=VALUE, VALUE parsed as JSON when possible)
        #[arg(long = "var", value_name = "KEY=VALUE")]
        vars: Vec<String>,

        /// Caller id used for admission control and auditing
        #[arg(long, default_value = promptflow::execution::DEFAULT_CALLER)]
        user: String,
    },

    /// Continue a paused or interrupted execution
    Resume {
        execution_id: String,

        /// Approval input (JSON, or a plain string)
        #[arg(long)]
        input: Option<String>,

        #[arg(long, default_value = promptflow::execution::DEFAULT_CALLER)]
        user: String,
    },

    /// Validate a workflow file and store it for `run --id`
    Save { file: PathBuf },

    /// Validate a workflow file without running it
    Validate { file: PathBuf },

    /// Show the state and timeline of an execution
    Status { execution_id: String },

    /// List executions of a workflow
    List { workflow_id: String },
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints the application banner with version information.
fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME.bold(), VERSION);
    println!("Workflow Execution Engine");
    println!();
}

/// Parses a JSON value, falling back to a plain string.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Parses `KEY=VALUE` pairs into an initial context.
fn parse_vars(vars: &[String]) -> Result<WorkflowContext, String> {
    let mut context = WorkflowContext::new();
    for var in vars {
        let (key, value) = var
            .split_once('=')
            .ok_or_else(|| format!("Invalid --var '{}': expected KEY=VALUE", var))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("Invalid --var '{}': empty key", var));
        }
        context.insert(key.to_string(), parse_value(value));
    }
    Ok(context)
}

/// Config file, then environment, then flags.
fn build_config(cli: &Cli) -> Result<EngineConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    config.apply_env()?;

    if let Some(dir) = &cli.state_dir {
        config.state_dir = dir.clone();
    }
    if let Some(dir) = &cli.prompts_dir {
        config.prompts_dir = Some(dir.clone());
    }
    if let Some(image) = &cli.sandbox_image {
        config.shell.sandbox_image = Some(image.clone());
    }
    if cli.allow_unsandboxed {
        config.shell.allow_unsandboxed = true;
    }

    debug!("Configuration: {:?}", config);
    Ok(config)
}

async fn build_engine(config: &EngineConfig) -> Result<WorkflowEngine, Box<dyn std::error::Error>> {
    let prompts = PromptLibrary::new();
    if let Some(dir) = &config.prompts_dir {
        prompts.load_dir(dir).await?;
    }

    info!("State directory: {}", config.state_dir.display());
    let store = FileStateStore::new(config.state_dir.clone());

    Ok(WorkflowEngine::from_config(
        config,
        Arc::new(store),
        Arc::new(prompts),
    ))
}

fn print_result(result: &RunWorkflowResult) {
    println!();
    if result.paused {
        println!("{} {}", "PAUSED".yellow().bold(), result.message);
        if let Some(prompt) = &result.prompt {
            println!("  Prompt: {}", prompt);
        }
        println!(
            "  Resume with: {} resume {} --input <VALUE>",
            APP_NAME, result.execution_id
        );
    } else if result.success {
        println!("{} {}", "OK".green().bold(), result.message);
    } else {
        println!("{} {}", "FAILED".red().bold(), result.message);
    }
    println!("  Execution: {}", result.execution_id);

    if let Some(outputs) = &result.outputs {
        if !outputs.is_empty() {
            println!("  Outputs:");
            for (key, value) in outputs {
                println!("    {} = {}", key.cyan(), value);
            }
        }
    }
}

fn status_label(status: ExecutionStatus) -> colored::ColoredString {
    match status {
        ExecutionStatus::Running => status.as_str().blue(),
        ExecutionStatus::Paused => status.as_str().yellow(),
        ExecutionStatus::Completed => status.as_str().green(),
        ExecutionStatus::Failed => status.as_str().red(),
    }
}

fn print_state(state: &WorkflowExecutionState) {
    println!("Execution:  {}", state.execution_id);
    println!("Workflow:   {} v{}", state.workflow_id, state.workflow_version);
    println!("Status:     {}", status_label(state.status));
    if let Some(step) = &state.current_step_id {
        println!("Step:       {}", step);
    }
    println!("Created:    {}", state.created_at.to_rfc3339());
    println!("Updated:    {}", state.updated_at.to_rfc3339());
    println!();
    println!("History:");
    for entry in &state.history {
        let mark = if entry.success { "ok".green() } else { "failed".red() };
        print!("  {:12} {:6}", entry.step_id, mark);
        if let Some(error) = &entry.error {
            print!(" {}", error);
        }
        println!();
    }
    let timeline = ExecutionTimeline::from_state(state);
    print!("{}", timeline.gantt_chart());
    print!("{}", format_durations(&timeline));
}

/// Per-step time spent, sorted by step id.
fn format_durations(timeline: &ExecutionTimeline) -> String {
    let durations: BTreeMap<String, u64> = timeline.get_durations().into_iter().collect();
    if durations.is_empty() {
        return String::new();
    }
    let mut output = String::from("\nDurations:\n");
    for (step_id, ms) in durations {
        output.push_str(&format!("  {:12} {} ms\n", step_id, ms));
    }
    output
}

fn load_file(file: &Path) -> Result<Workflow, String> {
    info!("Loading workflow: {}", file.display());
    load_workflow(file).map_err(|e| {
        error!("Failed to load workflow: {}", e);
        format!("Could not load workflow from '{}': {}", file.display(), e)
    })
}

/// Main application entry point. Returns whether the command succeeded.
async fn run(cli: Cli) -> Result<bool, Box<dyn std::error::Error>> {
    let config = build_config(&cli)?;

    match cli.command {
        Commands::Validate { file } => {
            let workflow = load_workflow(&file)?;
            println!(
                "{} '{}' v{} ({} steps)",
                "Valid".green().bold(),
                workflow.id,
                workflow.version,
                workflow.len()
            );
            Ok(true)
        }
        Commands::Run {
            file,
            id,
            version,
            vars,
            user,
        } => {
            let initial = parse_vars(&vars)?;
            let result = match (file, id) {
                (Some(file), _) => {
                    let workflow = load_file(&file)?;
                    let engine = build_engine(&config).await?;
                    engine.run_workflow_as(&user, &workflow, initial).await?
                }
                (None, Some(id)) => {
                    info!("Running stored workflow: {}", id);
                    let engine = build_engine(&config).await?;
                    engine
                        .run_stored_workflow_as(&user, &id, version, initial)
                        .await?
                }
                (None, None) => return Err("run needs a workflow file or --id".into()),
            };
            print_result(&result);
            Ok(result.success)
        }
        Commands::Save { file } => {
            let workflow = load_file(&file)?;
            let engine = build_engine(&config).await?;
            engine.save_workflow(&workflow).await?;
            println!(
                "{} '{}' v{} ({} steps)",
                "Saved".green().bold(),
                workflow.id,
                workflow.version,
                workflow.len()
            );
            Ok(true)
        }
        Commands::Resume {
            execution_id,
            input,
            user,
        } => {
            let engine = build_engine(&config).await?;
            let input = input.as_deref().map(parse_value);
            let result = engine
                .resume_workflow_as(&user, &execution_id, input)
                .await?;
            print_result(&result);
            Ok(result.success)
        }
        Commands::Status { execution_id } => {
            let engine = build_engine(&config).await?;
            let state = engine.get_execution(&execution_id).await?;
            print_state(&state);
            Ok(true)
        }
        Commands::List { workflow_id } => {
            let engine = build_engine(&config).await?;
            let states = engine.list_executions(&workflow_id).await?;
            if states.is_empty() {
                println!("No executions for '{}'", workflow_id);
            }
            for state in states {
                println!(
                    "{}  {:9}  {}  {} steps",
                    state.execution_id,
                    status_label(state.status),
                    state.created_at.format("%Y-%m-%d %H:%M:%S"),
                    state.history.len()
                );
            }
            Ok(true)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.verbose);
    print_banner();

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!();
            eprintln!("{} {}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_vars() {
        let context = parse_vars(&[
            "topic=rust".to_string(),
            "count=3".to_string(),
            "tags=[\"a\"]".to_string(),
            "eq=a=b".to_string(),
        ])
        .unwrap();

        assert_eq!(context["topic"], json!("rust"));
        assert_eq!(context["count"], json!(3));
        assert_eq!(context["tags"], json!(["a"]));
        assert_eq!(context["eq"], json!("a=b"));
    }

    #[test]
    fn test_parse_vars_rejects_malformed() {
        assert!(parse_vars(&["novalue".to_string()]).is_err());
        assert!(parse_vars(&["=x".to_string()]).is_err());
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "promptflow",
            "--allow-unsandboxed",
            "run",
            "flow.yaml",
            "--var",
            "a=1",
            "--user",
            "u1",
        ])
        .unwrap();

        assert!(cli.allow_unsandboxed);
        match cli.command {
            Commands::Run {
                file,
                id,
                vars,
                user,
                ..
            } => {
                assert_eq!(file, Some(PathBuf::from("flow.yaml")));
                assert!(id.is_none());
                assert_eq!(vars, vec!["a=1"]);
                assert_eq!(user, "u1");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_cli_parses_run_by_id() {
        let cli =
            Cli::try_parse_from(["promptflow", "run", "--id", "summarize", "--version", "2"])
                .unwrap();

        match cli.command {
            Commands::Run {
                file, id, version, ..
            } => {
                assert!(file.is_none());
                assert_eq!(id.as_deref(), Some("summarize"));
                assert_eq!(version, Some(2));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_cli_run_needs_file_or_id() {
        assert!(Cli::try_parse_from(["promptflow", "run"]).is_err());
        assert!(Cli::try_parse_from(["promptflow", "run", "flow.yaml", "--id", "wf"]).is_err());
        assert!(Cli::try_parse_from(["promptflow", "run", "flow.yaml", "--version", "2"]).is_err());
    }

    #[test]
    fn test_cli_parses_save() {
        let cli = Cli::try_parse_from(["promptflow", "save", "flow.yaml"]).unwrap();
        match cli.command {
            Commands::Save { file } => assert_eq!(file, PathBuf::from("flow.yaml")),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_format_durations_sums_per_step() {
        use chrono::Duration;
        use promptflow::workflow::HistoryEntry;

        let mut state = WorkflowExecutionState::new("wf", 1, WorkflowContext::new(), None);
        let start = state.created_at;
        for (step_id, ms) in [("b", 30), ("a", 10), ("b", 5)] {
            state.record(HistoryEntry {
                step_id: step_id.to_string(),
                executed_at: start + Duration::milliseconds(50),
                success: true,
                output: None,
                error: None,
                duration_ms: Some(ms),
            });
        }

        let text = format_durations(&ExecutionTimeline::from_state(&state));
        let lines: Vec<&str> = text.lines().filter(|l| l.contains("ms")).collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].trim_start().starts_with("a") && lines[0].ends_with("10 ms"));
        assert!(lines[1].trim_start().starts_with("b") && lines[1].ends_with("35 ms"));
    }
}
