// Error taxonomy for the model lifecycle
//
// Most internals return anyhow::Result with context. These variants are the
// failures callers are expected to match on.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Persisted JSON/CSV could not be parsed. Recovered by falling back to defaults.
    #[error("corrupt storage at {path}: {detail}")]
    StorageCorruption { path: PathBuf, detail: String },

    /// Label update targeted an id that is not in the feedback log
    #[error("feedback row {0} not found")]
    RowNotFound(u64),

    /// Training routine raised or exited non-zero
    #[error("training failed: {0}")]
    TrainingFailure(String),

    /// Training output carried no recognizable metrics
    #[error("no metrics recognized in training output")]
    MetricsUnrecognized,

    /// Remote publish did not succeed; the local version stays valid
    #[error("publish failed: {0}")]
    PublishFailure(String),

    /// A persisted running job was older than the staleness window
    #[error("stale retrain job started at {started_at} was reset")]
    StaleJobDetected { started_at: chrono::DateTime<chrono::Utc> },

    /// Another retrain job is already in flight
    #[error("a retrain job is already running")]
    AlreadyRunning,

    /// Version does not exist in the registry
    #[error("unknown model version '{0}'")]
    UnknownVersion(String),

    /// Labels are binary: 0 (fact) or 1 (hoax)
    #[error("invalid label {0}, expected 0 or 1")]
    InvalidLabel(i64),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
