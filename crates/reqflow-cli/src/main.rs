//! Reqflow CLI - requirement decomposition workflow engine

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use reqflow_core::checkpoint::{CheckpointStore, SqliteCheckpointStore};
use reqflow_core::config::Config;
use reqflow_core::domain::{ReviewDecision, ReviewReason, RunId, RunState, RunStatus};
use reqflow_core::events::{JsonlEventSink, ProgressBroadcaster, ProgressEvent, ProgressKind};
use reqflow_core::llm::LlmClient;
use reqflow_core::model_call::ModelCallWrapper;
use reqflow_core::pipeline::RunManager;
use reqflow_core::skills::SkillLibrary;
use reqflow_core::source::{PlainTextExtractor, TextExtractor};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "reqflow")]
#[command(author, version, about = "Requirement decomposition workflow engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Decompose a document's requirements for one subsystem
    Run {
        /// Source document (.txt or .md)
        file: PathBuf,
        /// Target subsystem name
        #[arg(short, long)]
        subsystem: String,
        /// Quality gate threshold in [0, 1]
        #[arg(long)]
        threshold: Option<f64>,
        /// Maximum Decompose iterations before review
        #[arg(long)]
        max_iterations: Option<u32>,
        /// Pause for review after the strategy is produced
        #[arg(long)]
        review_before: bool,
        /// Approve every review automatically
        #[arg(long)]
        non_interactive: bool,
        /// Append progress events to this JSONL file
        #[arg(long)]
        events: Option<PathBuf>,
    },

    /// Continue a run from its latest checkpoint
    Resume {
        run_id: String,
        /// Approve every review automatically
        #[arg(long)]
        non_interactive: bool,
        /// Append progress events to this JSONL file
        #[arg(long)]
        events: Option<PathBuf>,
    },

    /// Show the latest checkpoint of a run
    Status { run_id: String },

    /// List stored runs, newest first
    Runs,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// List all configuration values
    List,
    /// Reset configuration to defaults
    Reset,
    /// Show config file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("reqflow_core=info,reqflow=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            subsystem,
            threshold,
            max_iterations,
            review_before,
            non_interactive,
            events,
        } => {
            let options = RunOptions {
                threshold,
                max_iterations,
                review_before,
                interactive: !non_interactive && std::io::stdin().is_terminal(),
                events,
            };
            cmd_run(&file, &subsystem, options, cli.format, cli.quiet).await
        }

        Commands::Resume {
            run_id,
            non_interactive,
            events,
        } => {
            let interactive = !non_interactive && std::io::stdin().is_terminal();
            cmd_resume(&run_id, interactive, events, cli.format, cli.quiet).await
        }

        Commands::Status { run_id } => cmd_status(&run_id, cli.format).await,

        Commands::Runs => cmd_runs(cli.format, cli.quiet).await,

        Commands::Config { action } => cmd_config(action, cli.quiet),
    }
}

struct RunOptions {
    threshold: Option<f64>,
    max_iterations: Option<u32>,
    review_before: bool,
    interactive: bool,
    events: Option<PathBuf>,
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn open_store(config: &Config) -> anyhow::Result<Arc<SqliteCheckpointStore>> {
    let path = config.database_path();
    let store = SqliteCheckpointStore::open(&path)
        .await
        .with_context(|| format!("failed to open checkpoint database {}", path.display()))?;
    Ok(Arc::new(store))
}

async fn build_manager(config: &Config) -> anyhow::Result<Arc<RunManager>> {
    config.validate()?;
    let client = LlmClient::from_env(config.llm.clone())?;
    let model = Arc::new(ModelCallWrapper::new(
        Arc::new(client),
        config.model_preferences(),
        config.retry_policy(),
    ));
    let skills = match &config.storage.skills_dir {
        Some(dir) => SkillLibrary::with_dir(dir),
        None => SkillLibrary::builtin(),
    };
    let events = ProgressBroadcaster::new(config.events.channel_capacity);

    Ok(Arc::new(RunManager::new(
        open_store(config).await?,
        Arc::new(events),
        model,
        Arc::new(skills),
        config.stage_settings(),
    )))
}

async fn cmd_run(
    file: &Path,
    subsystem: &str,
    options: RunOptions,
    format: OutputFormat,
    quiet: bool,
) -> anyhow::Result<()> {
    let config = Config::load()?;
    let text = PlainTextExtractor.extract(file).await?;

    let mut input = config
        .run_input(file.display().to_string(), text, subsystem)
        .with_interactive(options.interactive);
    if let Some(threshold) = options.threshold {
        input = input.with_threshold(threshold);
    }
    if let Some(max_iterations) = options.max_iterations {
        input = input.with_max_iterations(max_iterations);
    }
    if options.review_before {
        input = input.with_review_before_decompose(true);
    }

    let manager = build_manager(&config).await?;
    let receiver = manager.subscribe();
    let sink = attach_sink(&manager, options.events.as_deref())?;

    let run_id = manager.start(input).await?;
    if !quiet && format == OutputFormat::Text {
        println!("Started run {}", run_id);
        if !options.interactive {
            println!("Reviews will be approved automatically.");
        }
    }

    follow(&manager, &run_id, receiver, format, quiet).await?;
    finish(&manager, &run_id, sink, format, quiet).await
}

async fn cmd_resume(
    run_id: &str,
    interactive: bool,
    events: Option<PathBuf>,
    format: OutputFormat,
    quiet: bool,
) -> anyhow::Result<()> {
    let config = Config::load()?;
    let manager = build_manager(&config).await?;
    let run_id = RunId::from(run_id);

    let receiver = manager.subscribe();
    let sink = attach_sink(&manager, events.as_deref())?;

    let state = manager.resume(&run_id).await?;
    if state.is_terminal() {
        if !quiet {
            println!("Run {} already finished ({}).", run_id, state.status);
        }
        return print_state(&state, format);
    }
    if state.input.interactive && !interactive && !quiet {
        println!("stdin is not interactive; pending reviews will wait for a decision.");
    }

    if !quiet && format == OutputFormat::Text {
        println!("Resuming run {}", run_id);
    }
    follow(&manager, &run_id, receiver, format, quiet).await?;
    finish(&manager, &run_id, sink, format, quiet).await
}

async fn cmd_status(run_id: &str, format: OutputFormat) -> anyhow::Result<()> {
    let config = Config::load()?;
    let store = open_store(&config).await?;
    let run_id = RunId::from(run_id);

    let Some(state) = store.load(&run_id).await? else {
        bail!("Run '{}' not found", run_id);
    };
    print_state(&state, format)
}

async fn cmd_runs(format: OutputFormat, quiet: bool) -> anyhow::Result<()> {
    let config = Config::load()?;
    let store = open_store(&config).await?;
    let runs = store.list().await?;

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
        return Ok(());
    }

    if runs.is_empty() {
        if !quiet {
            println!("No runs found.");
            println!("\nStart one with: reqflow run <file> --subsystem <name>");
        }
        return Ok(());
    }

    if !quiet {
        println!("Runs:");
    }
    for run in runs {
        println!(
            "  {} - {} [{}] iteration {} ({})",
            run.run_id,
            run.target_subsystem,
            run.status,
            run.iteration,
            run.updated_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

fn cmd_config(action: ConfigAction, quiet: bool) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key)?;
            println!("{}", value);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = Config::load()?;
            for (key, value) in config.list()? {
                println!("{} = {}", key, value);
            }
        }
        ConfigAction::Reset => {
            Config::reset()?;
            if !quiet {
                println!("Configuration reset to defaults.");
            }
        }
        ConfigAction::Path => {
            println!("{}", Config::config_path().display());
        }
    }
    Ok(())
}

// ============================================================================
// Run following
// ============================================================================

fn attach_sink(
    manager: &RunManager,
    path: Option<&Path>,
) -> anyhow::Result<Option<tokio::task::JoinHandle<()>>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let sink = JsonlEventSink::open(path)
        .with_context(|| format!("failed to open event file {}", path.display()))?;
    debug!(path = %path.display(), "Writing progress events");
    Ok(Some(sink.spawn(manager.subscribe(), true)))
}

/// Print progress until the run ends, answering review requests on the way
async fn follow(
    manager: &Arc<RunManager>,
    run_id: &RunId,
    mut receiver: broadcast::Receiver<ProgressEvent>,
    format: OutputFormat,
    quiet: bool,
) -> anyhow::Result<()> {
    loop {
        let event = tokio::select! {
            received = receiver.recv() => match received {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Progress display lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            },
            _ = tokio::signal::ctrl_c() => {
                info!(run_id = %run_id, "Interrupted, cancelling run");
                manager.cancel(run_id).await?;
                continue;
            }
        };
        if &event.run_id != run_id {
            continue;
        }

        if !quiet {
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string(&event)?),
                OutputFormat::Text => print_event(&event.kind),
            }
        }

        match event.kind {
            ProgressKind::ReviewNeeded { reason, score } => {
                let (decision, feedback) = prompt_review(reason, score).await?;
                manager.resolve_review(run_id, decision, feedback).await?;
            }
            kind if kind.is_terminal() => return Ok(()),
            _ => {}
        }
    }
}

async fn finish(
    manager: &RunManager,
    run_id: &RunId,
    sink: Option<tokio::task::JoinHandle<()>>,
    format: OutputFormat,
    quiet: bool,
) -> anyhow::Result<()> {
    let state = manager.wait(run_id).await?;
    if let Some(sink) = sink {
        if let Err(e) = sink.await {
            warn!(error = %e, "Event writer stopped unexpectedly");
        }
    }

    if !quiet || format == OutputFormat::Json {
        print_state(&state, format)?;
    }
    match state.status {
        RunStatus::Completed => Ok(()),
        status => bail!("Run {} ended with status {}", run_id, status),
    }
}

fn print_event(kind: &ProgressKind) {
    match kind {
        ProgressKind::RunStarted { resumed: true, .. } => println!("Run resumed"),
        ProgressKind::RunStarted { .. } => {}
        ProgressKind::StageStarted { stage, iteration } if *iteration > 0 => {
            println!("  {} (iteration {})...", stage, iteration)
        }
        ProgressKind::StageStarted { stage, .. } => println!("  {}...", stage),
        ProgressKind::StageCompleted {
            stage,
            score: Some(score),
            ..
        } => println!("  {} done, quality {:.2}", stage, score),
        ProgressKind::StageCompleted { stage, .. } => println!("  {} done", stage),
        ProgressKind::ReviewNeeded { reason, .. } => println!("Review needed: {}", reason),
        ProgressKind::RunCompleted { outcome, .. } => match outcome {
            Some(outcome) => println!("Run completed: {}", outcome),
            None => println!("Run completed"),
        },
        ProgressKind::RunFailed { reason } => println!("Run failed: {}", reason),
    }
}

/// Ask for a review decision on the terminal
async fn prompt_review(
    reason: ReviewReason,
    score: Option<f64>,
) -> anyhow::Result<(ReviewDecision, Option<String>)> {
    tokio::task::spawn_blocking(move || read_review(reason, score)).await?
}

fn read_review(
    reason: ReviewReason,
    score: Option<f64>,
) -> anyhow::Result<(ReviewDecision, Option<String>)> {
    let mut editor = DefaultEditor::new()?;
    println!();
    match reason {
        ReviewReason::StrategyCheckpoint => println!("The allocation strategy is ready for review."),
        ReviewReason::GateExhausted => println!("The quality gate did not pass within the iteration limit."),
        ReviewReason::Failure => println!("The run hit an unrecoverable error."),
    }
    if let Some(score) = score {
        println!("Current quality score: {:.2}", score);
    }

    let decision = loop {
        match editor.readline("Decision [approve/revise/abandon]> ") {
            Ok(line) => match line.parse::<ReviewDecision>() {
                Ok(decision) => break decision,
                Err(e) => println!("{}", e),
            },
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                println!("No decision given, abandoning.");
                return Ok((ReviewDecision::Abandon, None));
            }
            Err(e) => return Err(e.into()),
        }
    };

    let feedback = match editor.readline("Feedback (optional)> ") {
        Ok(line) if !line.trim().is_empty() => Some(line.trim().to_string()),
        Ok(_) | Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => None,
        Err(e) => return Err(e.into()),
    };
    Ok((decision, feedback))
}

fn print_state(state: &RunState, format: OutputFormat) -> anyhow::Result<()> {
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(state)?);
        return Ok(());
    }

    println!("Run: {}", state.run_id);
    println!("  Source: {}", state.input.source_ref);
    println!("  Subsystem: {}", state.input.target_subsystem);
    println!("  Status: {}", state.status);
    if let Some(stage) = state.last_completed {
        println!("  Last completed stage: {}", stage);
    }
    println!("  Iteration: {}", state.iteration);
    if let Some(version) = &state.strategy_version {
        println!("  Strategy: {}", version);
    }
    if let Some(items) = &state.decomposed {
        println!("  Decomposed items: {}", items.len());
    }
    if let Some(quality) = &state.quality {
        println!(
            "  Quality: {:.2} (threshold {:.2})",
            quality.overall, state.input.quality_threshold
        );
    }
    if let Some(reason) = state.pending_review {
        println!("  Waiting for review: {}", reason);
    }
    if state.human_review_required {
        println!("  Human review required");
    }
    if let Some(outcome) = state.outcome {
        println!("  Outcome: {}", outcome);
    }
    if let Some(failure) = &state.failure {
        println!(
            "  Failure: {} at {}: {}",
            failure.kind, failure.stage, failure.message
        );
    }
    if state.fallback_uses > 0 {
        println!("  Fallback model uses: {}", state.fallback_uses);
    }
    for artifact in &state.artifacts {
        println!("  {}: {}", artifact.name, artifact.path);
    }
    println!(
        "  Updated: {}",
        state.updated_at.format("%Y-%m-%d %H:%M:%S")
    );
    Ok(())
}
