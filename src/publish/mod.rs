// Publish module
//
// Best-effort delivery of an archived version to a remote host. Publishing
// never fails the retrain: every outcome is a value, not an error.

mod directory;
mod hub;

pub use directory::DirectoryPublisher;
pub use hub::HubCliPublisher;

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::PublisherConfig;
use crate::registry::RetrainEntry;

/// Result of a publish attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishOutcome {
    pub success: bool,
    #[serde(default)]
    pub skipped: bool,
    /// Where the artifact can be found after a successful publish
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PublishOutcome {
    pub fn published(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: true,
            skipped: false,
            location: Some(location.into()),
            message: message.into(),
            error: None,
        }
    }

    pub fn skipped(message: impl Into<String>) -> Self {
        Self {
            success: false,
            skipped: true,
            location: None,
            message: message.into(),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            skipped: false,
            location: None,
            message: message.into(),
            error: Some(error.into()),
        }
    }
}

/// What is being published
#[derive(Debug, Clone)]
pub struct PublishTarget {
    pub version: String,
    pub commit_message: String,
}

impl PublishTarget {
    /// Target whose commit message summarizes the registry entry, when there is one
    pub fn for_version(version: &str, entry: Option<&RetrainEntry>) -> Self {
        Self {
            version: version.to_string(),
            commit_message: commit_message(version, entry),
        }
    }
}

pub trait ArtifactPublisher: Send + Sync {
    fn name(&self) -> &'static str;

    fn publish(&self, dir: &Path, target: &PublishTarget) -> PublishOutcome;
}

/// Publishing turned off in configuration
pub struct DisabledPublisher;

impl ArtifactPublisher for DisabledPublisher {
    fn name(&self) -> &'static str {
        "disabled"
    }

    fn publish(&self, _dir: &Path, target: &PublishTarget) -> PublishOutcome {
        tracing::info!(version = %target.version, "Publishing is disabled, skipping upload");
        PublishOutcome::skipped("Model upload disabled in config")
    }
}

pub fn publisher_from_config(config: &PublisherConfig) -> Box<dyn ArtifactPublisher> {
    match config {
        PublisherConfig::Disabled => Box::new(DisabledPublisher),
        PublisherConfig::HubCli { repo, token, cli } => {
            Box::new(HubCliPublisher::new(repo.clone(), token.clone(), cli.clone()))
        }
        PublisherConfig::Directory { root } => Box::new(DirectoryPublisher::new(root.clone())),
    }
}

fn metric_or_na(entry: &RetrainEntry, name: &str) -> String {
    entry
        .metrics
        .get(name)
        .map(|v| format!("{:.2}", v))
        .unwrap_or_else(|| "N/A".to_string())
}

pub fn commit_message(version: &str, entry: Option<&RetrainEntry>) -> String {
    let Some(entry) = entry else {
        return format!("Update model to {}", version);
    };

    let mut message = format!(
        "Auto-retrain {}\n\nMetrics:\n- Accuracy: {}\n- Precision: {}\n- Recall: {}\n- F1-Score: {}\n",
        version,
        metric_or_na(entry, "accuracy"),
        metric_or_na(entry, "precision"),
        metric_or_na(entry, "recall"),
        metric_or_na(entry, "f1"),
    );
    if entry.metrics_placeholder {
        message.push_str("(placeholder metrics, not measured)\n");
    }
    message.push_str(&format!(
        "\nFeedback samples: {}\nTrained at: {}\n",
        entry.feedback_rows_used,
        entry.trained_at.to_rfc3339()
    ));
    message
}
