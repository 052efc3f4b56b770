use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use serde::Serialize;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{ExitCode, Stdio};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

mod cli;

use cli::Cli;
use cli::commands::{Commands, ContextFormat, ReportFormat};
use fixloop::classify::ErrorSummary;
use fixloop::config::Config;
use fixloop::domain::TaskMeta;
use fixloop::engine::{FixEngine, TrackedFailure};
use fixloop::error::FixloopError;
use fixloop::feedback::FeedbackItem;
use fixloop::id::generate_run_id;

/// Logs go to stderr; stdout carries command results.
fn setup_logging(cli: &Cli, config: &Config) {
    let default_level = if cli.is_verbose() {
        "debug"
    } else {
        config.log_level.as_deref().unwrap_or("warn")
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .target(env_logger::Target::Stderr)
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context("Failed to serialize output")?);
    Ok(())
}

fn read_input(input: &Path) -> Result<String> {
    let mut text = String::new();
    if input == Path::new("-") {
        std::io::stdin()
            .read_to_string(&mut text)
            .map_err(|e| FixloopError::InvalidInput(format!("cannot read stdin: {}", e)))?;
    } else {
        text = fs::read_to_string(input)
            .map_err(|e| {
                FixloopError::InvalidInput(format!("cannot read {}: {}", input.display(), e))
            })?;
    }
    Ok(text)
}

#[derive(Serialize)]
struct SplitOutput {
    errors: Vec<fixloop::classify::ErrorAnalysis>,
    summary: ErrorSummary,
}

#[derive(Serialize)]
struct RunSummary {
    outcome: &'static str,
    attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure: Option<TrackedFailure>,
}

struct AttemptOutput {
    success: bool,
    output: String,
}

async fn run_application(cli: &Cli, config: &Config) -> Result<ExitCode> {
    let mut meta = TaskMeta::default();
    if let Commands::Run {
        workflow_id, run_id, ..
    } = &cli.command
    {
        meta.workflow_id = workflow_id.clone();
        meta.run_id = run_id.clone().unwrap_or_else(generate_run_id);
    }
    let engine = FixEngine::from_config(config, meta).context("Failed to initialize engine")?;

    let code = dispatch(&cli.command, &engine, config).await;

    if let Err(e) = engine.finish() {
        log::warn!("Failed to persist run metrics: {}", e);
    }
    code
}

async fn dispatch(command: &Commands, engine: &FixEngine, config: &Config) -> Result<ExitCode> {
    match command {
        Commands::ClassifyError {
            input,
            source,
            split,
        } => {
            let text = read_input(input)?;
            if let Some(source) = source {
                info!("Classifying error text from {}", source);
            }
            if *split {
                let errors = engine.analyze_all(&text);
                let summary = ErrorSummary::from_analyses(&errors);
                print_json(&SplitOutput { errors, summary })?;
            } else {
                print_json(&engine.analyze(&text))?;
            }
        }
        Commands::DecideRetry { category, attempt } => {
            print_json(&engine.decide_retry(*category, *attempt))?;
        }
        Commands::BuildContext {
            root,
            keywords,
            max_tokens,
            max_items,
            force_refresh,
            format,
        } => {
            let max_tokens = max_tokens.unwrap_or(config.context.max_tokens);
            let max_items = max_items.unwrap_or(config.context.max_items);
            if max_tokens == 0 || max_items == 0 {
                return Err(FixloopError::InvalidInput(
                    "--max-tokens and --max-items must be positive".to_string(),
                )
                .into());
            }
            let root = root.clone().unwrap_or_else(|| PathBuf::from("."));
            if !root.is_dir() {
                let message = format!("{} is not a directory", root.display());
                return Err(FixloopError::InvalidInput(message).into());
            }
            let mut request = fixloop::context::ContextRequest::new(root, max_items, max_tokens)
                .with_keywords(keywords.clone());
            request.force_refresh = *force_refresh;

            let bundle = engine.build_context(&request);
            match format {
                ContextFormat::Json => print_json(&bundle)?,
                ContextFormat::Text => print!("{}", bundle.render_text()),
            }
        }
        Commands::RecordFeedback {
            message,
            feedback_type,
            source,
            severity,
            outcome,
            category,
        } => {
            if message.trim().is_empty() {
                let message = "--message must not be empty".to_string();
                return Err(FixloopError::InvalidInput(message).into());
            }
            let mut item = FeedbackItem::new(message, *feedback_type, *source)
                .with_severity(*severity)?
                .with_outcome(*outcome);
            if let Some(category) = category {
                item = item.with_category(*category);
            }
            let id = item.id.clone();
            engine.record_feedback(item).context("Failed to record feedback")?;
            print_json(&serde_json::json!({ "recorded": id }))?;
        }
        Commands::Report { days, format } => {
            let days = days.unwrap_or(config.feedback.window_days);
            let report = engine.report(days).context("Failed to build report")?;
            match format {
                ReportFormat::Json => println!("{}", report.to_json()?),
                ReportFormat::Markdown => print!("{}", report.render_markdown()),
            }
        }
        Commands::Cleanup => {
            print_json(&engine.cleanup().context("Cleanup failed")?)?;
        }
        Commands::Run {
            source,
            timeout_secs,
            context_out,
            command,
            ..
        } => {
            let cancel = cancellation_token(*timeout_secs);
            let source = source.as_deref();
            return run_loop(engine, command, source, context_out.as_deref(), &cancel).await;
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Token cancelled on Ctrl-C or when the optional timeout elapses.
fn cancellation_token(timeout_secs: Option<u64>) -> CancellationToken {
    let cancel = CancellationToken::new();

    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "Interrupted, cancelling".yellow());
            on_signal.cancel();
        }
    });

    if let Some(secs) = timeout_secs {
        let on_timeout = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            eprintln!("{} after {}s", "Timed out".yellow(), secs);
            on_timeout.cancel();
        });
    }

    cancel
}

/// Run `command` once; `None` when cancelled first.
async fn execute(command: &[String], cancel: &CancellationToken) -> Result<Option<AttemptOutput>> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| FixloopError::InvalidInput("no command given".to_string()))?;
    let child = tokio::process::Command::new(program)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| FixloopError::InvalidInput(format!("cannot start {}: {}", program, e)))?;

    tokio::select! {
        _ = cancel.cancelled() => Ok(None),
        output = child.wait_with_output() => {
            let output = output.context("Failed to wait for command")?;
            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
            text.push_str(&String::from_utf8_lossy(&output.stderr));
            eprint!("{}", text);
            Ok(Some(AttemptOutput {
                success: output.status.success(),
                output: text,
            }))
        }
    }
}

async fn run_loop(
    engine: &FixEngine,
    command: &[String],
    source: Option<&str>,
    context_out: Option<&Path>,
    cancel: &CancellationToken,
) -> Result<ExitCode> {
    let mut failure: Option<TrackedFailure> = None;

    loop {
        let attempts = failure.as_ref().map(|f| f.record.attempt_count).unwrap_or(0);
        eprintln!("{} {} (attempt {})", "Running".cyan(), command.join(" "), attempts + 1);

        let Some(attempt) = execute(command, cancel).await? else {
            eprintln!("{}", "Cancelled".red().bold());
            if let Some(f) = failure.as_mut() {
                engine.cancel(f)?;
            }
            print_json(&RunSummary {
                outcome: "cancelled",
                attempts,
                failure,
            })?;
            return Ok(ExitCode::from(1));
        };

        if attempt.success {
            let outcome = match failure.as_mut() {
                Some(f) => {
                    engine.resolve(f)?;
                    eprintln!(
                        "{} after {} retries",
                        "Resolved".green().bold(),
                        f.record.attempt_count
                    );
                    "resolved"
                }
                None => {
                    eprintln!("{}", "Passed".green().bold());
                    "passed"
                }
            };
            print_json(&RunSummary {
                outcome,
                attempts,
                failure,
            })?;
            return Ok(ExitCode::SUCCESS);
        }

        let (mut tracked, decision) = match failure.take() {
            Some(mut f) => {
                let decision = engine.attempt_failed(&mut f, &attempt.output)?;
                (f, decision)
            }
            None => {
                let mut f = engine.observe_failure(&attempt.output, source)?;
                let decision = engine.decide(&mut f)?;
                (f, decision)
            }
        };

        if !decision.retry {
            let reason = decision.stop_reason.map(|r| r.to_string()).unwrap_or_default();
            eprintln!(
                "{} {} failure: {}",
                "Exhausted".red().bold(),
                tracked.classification.category,
                reason
            );
            print_json(&RunSummary {
                outcome: "exhausted",
                attempts: tracked.record.attempt_count,
                failure: Some(tracked),
            })?;
            return Ok(ExitCode::from(1));
        }

        eprintln!(
            "{} {} failure, retrying in {}ms ({}/{})",
            "Retry".yellow().bold(),
            tracked.classification.category,
            decision.delay_ms,
            decision.attempt + 1,
            decision.max_attempts
        );

        if let Some(path) = context_out {
            let request = engine.context_request(FixEngine::failure_keywords(&tracked));
            let bundle = engine.build_context(&request);
            fs::write(path, bundle.render_text())
                .context(format!("Failed to write context to {}", path.display()))?;
            info!("Wrote {} context items to {}", bundle.items.len(), path.display());
        }

        match engine.backoff(&mut tracked, &decision, cancel).await {
            Ok(()) => failure = Some(tracked),
            Err(FixloopError::Cancelled { reason }) => {
                eprintln!("{} {}", "Cancelled".red().bold(), reason);
                print_json(&RunSummary {
                    outcome: "cancelled",
                    attempts: tracked.record.attempt_count,
                    failure: Some(tracked),
                })?;
                return Ok(ExitCode::from(1));
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn exit_code_for(err: &eyre::Report) -> u8 {
    err.chain()
        .find_map(|e| e.downcast_ref::<FixloopError>())
        .map(|e| e.exit_code() as u8)
        .unwrap_or(1)
}

#[tokio::main]
async fn main() -> ExitCode {
    // Usage errors exit 2 from clap itself.
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_ref()).and_then(|c| c.validate().map(|_| c)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            return ExitCode::from(1);
        }
    };

    setup_logging(&cli, &config);
    info!("Starting with config from: {:?}", cli.config);

    match run_application(&cli, &config).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            ExitCode::from(exit_code_for(&e))
        }
    }
}
