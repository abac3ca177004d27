// Command-line argument types

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Feedback-driven retraining and model version management
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "hoaxlens")]
#[command(version)]
#[command(about = "Decide when to retrain the hoax classifier, run the retrain, and manage model versions")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Config file (default: <data dir>/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// State directory (default: ~/.hoaxlens)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Current version, feedback counts and whether a retrain is due
    Status {
        /// Override the configured retrain threshold
        #[arg(long)]
        threshold: Option<u32>,
    },

    /// Snapshot of the running (or last) retrain job
    Progress,

    /// Retrain if enough new feedback exists
    Retrain(RetrainArgs),

    /// Clear retrain progress (does not stop a running trainer)
    Reset,

    /// Retrain history
    History,

    /// Known model versions
    Versions,

    /// Make an existing version current
    Rollback {
        version: String,
    },

    /// Publish an archived version again
    Publish {
        version: String,
    },

    /// Record a prediction in the feedback log
    Log(LogArgs),

    /// Attach a user label (0 = fact, 1 = hoax) to a feedback row
    Label {
        id: u64,
        #[arg(allow_negative_numbers = true)]
        label: i64,
    },

    /// Show the most recent feedback rows
    Tail {
        #[arg(short = 'n', long, default_value_t = 10)]
        count: usize,
    },

    /// Create state files and archive the current model as the base version
    Init,
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct RetrainArgs {
    /// Skip the feedback threshold check
    #[arg(long)]
    pub force: bool,

    /// Override the configured retrain threshold
    #[arg(long)]
    pub threshold: Option<u32>,
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct LogArgs {
    /// Text that was classified
    pub text: String,

    /// Predicted class (0 = fact, 1 = hoax)
    #[arg(long)]
    pub prediction: i64,

    #[arg(long)]
    pub prob_hoax: f64,

    #[arg(long)]
    pub confidence: f64,

    /// User label, if already known
    #[arg(long)]
    pub label: Option<i64>,

    #[arg(long, default_value = "indobert")]
    pub model_name: String,

    /// Defaults to the registry's current version
    #[arg(long)]
    pub model_version: Option<String>,
}

/// Parse arguments (testable without touching the process args)
pub fn parse_args<I, T>(args: I) -> Result<Cli, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    Cli::try_parse_from(args)
}
