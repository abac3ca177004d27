// Retrain decision - is there enough new feedback to justify a run?

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::RetrainConfig;
use crate::feedback::FeedbackLog;
use crate::registry::ModelRegistry;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrainDecision {
    pub should_retrain: bool,
    /// Rows added since the last retrain. Negative when the log shrank.
    /// When only the absolute minimum blocks a run this is the total row count.
    pub new_feedback_count: i64,
    pub reason: String,
}

/// Pure decision rule over counts
pub fn evaluate(total: u32, last_used: u64, threshold: u32, minimum: u32) -> RetrainDecision {
    let diff = i128::from(total) - i128::from(last_used);
    let new = i64::try_from(diff).unwrap_or(i64::MIN);

    if diff < 0 {
        return RetrainDecision {
            should_retrain: false,
            new_feedback_count: new,
            reason: format!(
                "Feedback log has {} rows but the last retrain used {}",
                total, last_used
            ),
        };
    }

    if new < i64::from(threshold) {
        return RetrainDecision {
            should_retrain: false,
            new_feedback_count: new,
            reason: format!("New feedback: {}/{}", new, threshold),
        };
    }

    if total < minimum {
        return RetrainDecision {
            should_retrain: false,
            new_feedback_count: i64::from(total),
            reason: format!("Minimum feedback not reached: {}/{}", total, minimum),
        };
    }

    RetrainDecision {
        should_retrain: true,
        new_feedback_count: new,
        reason: format!("Threshold reached: {} new feedback rows", new),
    }
}

/// Decide against the current log and registry. `threshold` overrides the configured one.
///
/// An unreadable feedback log is reported as a negative decision, not an error.
pub fn should_retrain(
    feedback: &FeedbackLog,
    registry: &ModelRegistry,
    config: &RetrainConfig,
    threshold: Option<u32>,
) -> RetrainDecision {
    let threshold = threshold.filter(|t| *t > 0).unwrap_or(config.threshold);
    let total = match feedback.count() {
        Ok(total) => total,
        Err(e) => {
            warn!(error = %format!("{:#}", e), "Feedback log unreadable, not retraining");
            return RetrainDecision {
                should_retrain: false,
                new_feedback_count: 0,
                reason: format!("Feedback log unreadable: {:#}", e),
            };
        }
    };
    let last_used = registry.read().last_used_feedback_id;

    let decision = evaluate(total, last_used, threshold, config.minimum_feedback);
    debug!(
        total,
        last_used,
        threshold,
        should_retrain = decision.should_retrain,
        "Retrain decision"
    );
    decision
}
