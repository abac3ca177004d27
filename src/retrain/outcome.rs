// Structured results of retrain attempts

use serde::Serialize;

use super::decision::RetrainDecision;
use crate::publish::PublishOutcome;
use crate::registry::Metrics;
use crate::training::DeviceInfo;

#[derive(Debug, Clone, Serialize)]
pub struct RetrainOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub metrics: Metrics,
    pub metrics_placeholder: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback_used: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish: Option<PublishOutcome>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RetrainOutcome {
    pub fn failed(error: impl Into<String>, device: Option<DeviceInfo>) -> Self {
        let error = error.into();
        Self {
            success: false,
            version: None,
            metrics: Metrics::new(),
            metrics_placeholder: false,
            feedback_used: None,
            device,
            publish: None,
            message: format!("Training failed: {}", error),
            error: Some(error),
        }
    }
}

/// What a trigger request led to
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TriggerOutcome {
    /// Not enough new feedback
    Skipped { decision: RetrainDecision },
    /// Another job holds the tracker
    AlreadyRunning,
    Finished { outcome: RetrainOutcome },
}
