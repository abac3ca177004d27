// CLI module
// Operator commands over the feedback log, registry and retrain pipeline

mod args;
mod commands;

pub use args::{parse_args, Cli, Command, LogArgs, RetrainArgs};
pub use commands::{execute, resolve_config, run_command};
