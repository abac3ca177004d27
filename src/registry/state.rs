// Registry data types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::constants::VERSION_PREFIX;

/// Metric name -> value (percent scale)
pub type Metrics = BTreeMap<String, f64>;

/// Numeric part of a version identifier (`v3` -> 3)
pub fn parse_version(version: &str) -> Option<u64> {
    version.trim().strip_prefix(VERSION_PREFIX)?.parse().ok()
}

pub fn format_version(number: u64) -> String {
    format!("{}{}", VERSION_PREFIX, number)
}

/// One successful retrain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrainEntry {
    pub version: String,
    pub trained_at: DateTime<Utc>,
    pub feedback_rows_used: u32,
    pub metrics: Metrics,
    /// Metrics are the fallback set, not values reported by training
    #[serde(default)]
    pub metrics_placeholder: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryState {
    pub current_version: String,
    #[serde(default)]
    pub last_used_feedback_id: u64,
    #[serde(default)]
    pub history: Vec<RetrainEntry>,
}

impl RegistryState {
    pub fn new(base_version: &str) -> Self {
        Self {
            current_version: base_version.to_string(),
            last_used_feedback_id: 0,
            history: Vec::new(),
        }
    }

    pub fn entry(&self, version: &str) -> Option<&RetrainEntry> {
        self.history.iter().find(|e| e.version == version)
    }

    /// Highest version number among `current_version` and history
    pub fn highest_version_number(&self) -> u64 {
        self.history
            .iter()
            .filter_map(|e| parse_version(&e.version))
            .chain(parse_version(&self.current_version))
            .max()
            .unwrap_or(0)
    }

    /// Version that follows every version this registry has ever issued
    pub fn next_version(&self) -> String {
        format_version(self.highest_version_number() + 1)
    }
}
