// Command handling
//
// Each command returns the text to print; main decides where it goes.

use anyhow::{Context, Result};
use serde::Serialize;

use super::args::{Cli, Command, LogArgs, RetrainArgs};
use crate::config::{load_config, Config};
use crate::errors::LifecycleError;
use crate::feedback::{FeedbackRecord, Label, NewFeedback};
use crate::progress::ProgressState;
use crate::registry::RegistryState;
use crate::retrain::{RetrainDecision, RetrainOrchestrator, RetrainOutcome, TriggerOutcome};

/// Load configuration honoring `--config` and `--data-dir`
pub fn resolve_config(cli: &Cli) -> Result<Config> {
    let explicit = cli.config.clone().or_else(|| {
        cli.data_dir
            .as_ref()
            .map(|dir| dir.join("config.toml"))
            .filter(|path| path.exists())
    });

    let mut config = load_config(explicit.as_deref())?;
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    Ok(config)
}

pub fn run_command(cli: &Cli) -> Result<String> {
    let config = resolve_config(cli)?;
    let orchestrator = RetrainOrchestrator::from_config(&config)?;
    execute(&orchestrator, &cli.command, cli.json)
}

/// Dispatch one command against an already built orchestrator
pub fn execute(orchestrator: &RetrainOrchestrator, command: &Command, json: bool) -> Result<String> {
    match command {
        Command::Status { threshold } => status(orchestrator, *threshold, json),
        Command::Progress => {
            let state = orchestrator.progress().get_state();
            render(json, &state, format_progress)
        }
        Command::Retrain(args) => retrain(orchestrator, args, json),
        Command::Reset => {
            orchestrator.progress().reset();
            Ok("Retrain progress reset".to_string())
        }
        Command::History => {
            let state = orchestrator.registry().read();
            render(json, &state, format_history)
        }
        Command::Versions => {
            let versions = orchestrator.registry().versions();
            let current = orchestrator.registry().current_version();
            if json {
                return to_json(&serde_json::json!({ "current": current, "versions": versions }));
            }
            Ok(format_versions(&versions, &current))
        }
        Command::Rollback { version } => {
            orchestrator.registry().rollback(version)?;
            Ok(format!("Current version is now {}", version))
        }
        Command::Publish { version } => {
            let outcome = orchestrator.republish(version)?;
            if json {
                return to_json(&outcome);
            }
            Ok(match (&outcome.location, &outcome.error) {
                (Some(location), _) => format!("{} ({})", outcome.message, location),
                (None, Some(error)) => format!("{}: {}", outcome.message, error),
                (None, None) => outcome.message.clone(),
            })
        }
        Command::Log(args) => log_prediction(orchestrator, args),
        Command::Label { id, label } => {
            let label = Label::try_from(*label)?;
            if !orchestrator.feedback().update_label(*id, label)? {
                return Err(LifecycleError::RowNotFound(*id).into());
            }
            Ok(format!("Feedback {} labeled {}", id, label))
        }
        Command::Tail { count } => {
            let records = orchestrator.feedback().tail(*count)?;
            render(json, &records, |r| format_records(r))
        }
        Command::Init => init(orchestrator),
    }
}

#[derive(Serialize)]
struct StatusReport {
    current_version: String,
    next_version: String,
    feedback_count: u32,
    last_used_feedback_id: u64,
    decision: RetrainDecision,
    progress: ProgressState,
}

fn status(orchestrator: &RetrainOrchestrator, threshold: Option<u32>, json: bool) -> Result<String> {
    let registry = orchestrator.registry().read();
    let report = StatusReport {
        next_version: registry.next_version(),
        current_version: registry.current_version,
        last_used_feedback_id: registry.last_used_feedback_id,
        feedback_count: orchestrator.feedback().count()?,
        decision: orchestrator.should_retrain(threshold),
        progress: orchestrator.progress().get_state(),
    };
    render(json, &report, format_status)
}

fn retrain(orchestrator: &RetrainOrchestrator, args: &RetrainArgs, json: bool) -> Result<String> {
    if let Err(e) = orchestrator.initialize_base_version() {
        tracing::warn!(error = %e, "Could not archive base version");
    }

    let outcome = orchestrator.trigger(args.force, args.threshold)?;
    if json {
        return to_json(&outcome);
    }

    match outcome {
        TriggerOutcome::Skipped { decision } => Ok(format!("Retrain skipped: {}", decision.reason)),
        TriggerOutcome::AlreadyRunning => Err(LifecycleError::AlreadyRunning.into()),
        TriggerOutcome::Finished { outcome } if outcome.success => Ok(format_outcome(&outcome)),
        TriggerOutcome::Finished { outcome } => Err(anyhow::anyhow!(outcome.message)),
    }
}

fn log_prediction(orchestrator: &RetrainOrchestrator, args: &LogArgs) -> Result<String> {
    let prediction = Label::try_from(args.prediction)?;
    let model_version = args
        .model_version
        .clone()
        .unwrap_or_else(|| orchestrator.registry().current_version());

    let mut entry = NewFeedback::new(
        args.model_name.clone(),
        model_version,
        args.text.clone(),
        prediction,
        args.prob_hoax,
        args.confidence,
    );
    if let Some(label) = args.label {
        entry = entry.with_user_label(Label::try_from(label)?);
    }

    let id = orchestrator.feedback().append(entry)?;
    Ok(format!("Logged feedback {}", id))
}

fn init(orchestrator: &RetrainOrchestrator) -> Result<String> {
    let registry = orchestrator.registry();
    let state = registry.read();
    let archived = orchestrator
        .initialize_base_version()
        .context("Failed to archive base version")?;

    let mut lines = vec![
        format!("Feedback log: {}", orchestrator.feedback().path().display()),
        format!("Registry:     {}", registry.path().display()),
        format!("Current:      {}", state.current_version),
    ];
    lines.push(if archived {
        format!("Archived current model as {}", registry.base_version())
    } else {
        format!("Base version {} already archived or no model present", registry.base_version())
    });
    Ok(lines.join("\n"))
}

fn render<T: Serialize + ?Sized>(json: bool, value: &T, text: impl Fn(&T) -> String) -> Result<String> {
    if json {
        to_json(value)
    } else {
        Ok(text(value))
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).context("Failed to serialize output")
}

fn format_status(report: &StatusReport) -> String {
    format!(
        "Current version:   {}\nNext version:      {}\nFeedback rows:     {} (last used: {})\nRetrain due:       {} ({})\nJob:               {} {}%",
        report.current_version,
        report.next_version,
        report.feedback_count,
        report.last_used_feedback_id,
        if report.decision.should_retrain { "yes" } else { "no" },
        report.decision.reason,
        report.progress.stage,
        report.progress.progress,
    )
}

fn format_progress(state: &ProgressState) -> String {
    let mut out = format!(
        "Stage:    {}{}\nProgress: {}%\nMessage:  {}\nEpoch:    {}/{}",
        state.stage,
        if state.is_running { " (running)" } else { "" },
        state.progress,
        state.message,
        state.current_epoch,
        state.total_epochs,
    );
    if let Some(started) = state.started_at {
        out.push_str(&format!("\nStarted:  {}", started.to_rfc3339()));
    }
    if let Some(eta) = state.estimated_completion {
        out.push_str(&format!("\nETA:      {}", eta.to_rfc3339()));
    }
    if let Some(error) = &state.error {
        out.push_str(&format!("\nError:    {}", error));
    }
    out
}

fn format_history(state: &RegistryState) -> String {
    if state.history.is_empty() {
        return format!("No retrains yet (current: {})", state.current_version);
    }

    let mut lines = vec![format!(
        "{:<8} {:<25} {:>9} {:>9} {:>9}",
        "VERSION", "TRAINED AT", "FEEDBACK", "ACCURACY", "F1"
    )];
    for entry in &state.history {
        let metric = |name: &str| {
            entry
                .metrics
                .get(name)
                .map(|v| format!("{:.2}", v))
                .unwrap_or_else(|| "-".to_string())
        };
        let marker = if entry.version == state.current_version { "*" } else { "" };
        lines.push(format!(
            "{:<8} {:<25} {:>9} {:>9} {:>9}{}",
            format!("{}{}", entry.version, marker),
            entry.trained_at.format("%Y-%m-%d %H:%M:%S UTC"),
            entry.feedback_rows_used,
            metric("accuracy"),
            metric("f1"),
            if entry.metrics_placeholder { "  (placeholder)" } else { "" },
        ));
    }
    lines.join("\n")
}

fn format_versions(versions: &[String], current: &str) -> String {
    versions
        .iter()
        .map(|v| {
            if v == current {
                format!("* {}", v)
            } else {
                format!("  {}", v)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_records(records: &[FeedbackRecord]) -> String {
    if records.is_empty() {
        return "Feedback log is empty".to_string();
    }
    records
        .iter()
        .map(|r| {
            let label = r
                .user_label
                .map(|l| l.to_string())
                .unwrap_or_else(|| "-".to_string());
            let preview: String = r.raw_text.chars().take(60).collect();
            format!(
                "#{:<5} pred={} label={} p_hoax={:.3} {} | {}",
                r.id,
                r.prediction,
                label,
                r.prob_hoax,
                r.model_version,
                preview.replace('\n', " ")
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_outcome(outcome: &RetrainOutcome) -> String {
    let mut out = outcome.message.clone();
    for (name, value) in &outcome.metrics {
        out.push_str(&format!("\n  {:<10} {:.2}", name, value));
    }
    if outcome.metrics_placeholder {
        out.push_str("\n  (placeholder metrics: training reported none)");
    }
    if let Some(publish) = &outcome.publish {
        out.push_str(&format!("\nPublish: {}", publish.message));
    }
    out
}
