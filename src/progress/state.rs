// Retrain progress snapshot

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pipeline stage of a retrain job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    #[default]
    Idle,
    Preparing,
    Training,
    Evaluating,
    Saving,
    Uploading,
    Completed,
    Failed,
}

impl Stage {
    /// Stages in which no job is in flight
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Idle | Stage::Completed | Stage::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Idle => "idle",
            Stage::Preparing => "preparing",
            Stage::Training => "training",
            Stage::Evaluating => "evaluating",
            Stage::Saving => "saving",
            Stage::Uploading => "uploading",
            Stage::Completed => "completed",
            Stage::Failed => "failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const IDLE_MESSAGE: &str = "No retrain in progress";

/// Flat record persisted as JSON. Timestamps are epoch seconds on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressState {
    pub is_running: bool,
    pub progress: u8,
    pub stage: Stage,
    pub message: String,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub estimated_completion: Option<DateTime<Utc>>,
    #[serde(default)]
    pub current_epoch: u32,
    #[serde(default)]
    pub total_epochs: u32,
    #[serde(default)]
    pub error: Option<String>,
}

impl ProgressState {
    pub fn idle(total_epochs: u32) -> Self {
        Self {
            is_running: false,
            progress: 0,
            stage: Stage::Idle,
            message: IDLE_MESSAGE.to_string(),
            started_at: None,
            estimated_completion: None,
            current_epoch: 0,
            total_epochs,
            error: None,
        }
    }

    /// Running snapshot whose start is older than `max_age`
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: chrono::Duration) -> bool {
        if !self.is_running || self.stage == Stage::Completed {
            return false;
        }
        match self.started_at {
            Some(started) => now - started > max_age,
            None => false,
        }
    }
}

/// Progress for a finished epoch: training spans 10..80 percent
pub fn epoch_progress(current_epoch: u32, total_epochs: u32) -> u8 {
    if total_epochs == 0 {
        return 10;
    }
    let span = 70 * u64::from(current_epoch) / u64::from(total_epochs);
    (10 + span).min(100) as u8
}
