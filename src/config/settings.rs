// Configuration structs

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::constants::*;
use crate::registry::parse_version;

/// Retraining policy knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrainConfig {
    /// New labeled feedback rows required since the last retrain
    pub threshold: u32,
    /// Absolute floor on total feedback rows, independent of the new count
    pub minimum_feedback: u32,
    /// Running jobs older than this are treated as abandoned at load time
    pub stale_after_hours: u64,
    /// Identifier of the pre-trained baseline
    pub base_version: String,
    /// Epochs requested from the training routine
    pub total_epochs: u32,
    /// Seed for the train/val/test shuffle
    pub split_seed: u64,
}

impl Default for RetrainConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_RETRAIN_THRESHOLD,
            minimum_feedback: DEFAULT_MINIMUM_FEEDBACK,
            stale_after_hours: DEFAULT_STALE_AFTER_HOURS,
            base_version: BASE_VERSION.to_string(),
            total_epochs: DEFAULT_TOTAL_EPOCHS,
            split_seed: DEFAULT_SPLIT_SEED,
        }
    }
}

/// Optional path overrides. Anything left unset resolves under `data_dir`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub feedback_file: Option<PathBuf>,
    pub registry_file: Option<PathBuf>,
    pub progress_file: Option<PathBuf>,
    /// Directory the training routine writes the fresh model into
    pub model_dir: Option<PathBuf>,
    /// Root of the version-labeled archive directories
    pub versions_dir: Option<PathBuf>,
    /// Original labeled corpus (CSV with `text,label` columns)
    pub base_corpus: Option<PathBuf>,
    /// Scratch directory for dataset splits handed to the trainer
    pub work_dir: Option<PathBuf>,
}

/// Which training backend to construct at startup
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TrainerConfig {
    /// External training program run as a child process
    Subprocess {
        command: Vec<String>,
        #[serde(default)]
        working_dir: Option<PathBuf>,
    },
    /// In-process majority-class baseline (no heavy runtime needed)
    Baseline,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        TrainerConfig::Baseline
    }
}

/// Where archived versions get published
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PublisherConfig {
    Disabled,
    /// Upload through the `huggingface-cli` tool
    HubCli {
        repo: String,
        #[serde(default)]
        token: Option<String>,
        #[serde(default = "default_hub_cli")]
        cli: String,
    },
    /// Mirror archives into another directory
    Directory { root: PathBuf },
}

impl Default for PublisherConfig {
    fn default() -> Self {
        PublisherConfig::Disabled
    }
}

fn default_hub_cli() -> String {
    DEFAULT_HUB_CLI.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root for all state files (default: ~/.hoaxlens)
    pub data_dir: PathBuf,
    pub retrain: RetrainConfig,
    pub storage: StorageConfig,
    pub trainer: TrainerConfig,
    pub publisher: PublisherConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self::with_data_dir(default_data_dir())
    }
}

/// `~/.hoaxlens`, or `./.hoaxlens` when no home directory is available
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DATA_DIR_NAME)
}

impl Config {
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            retrain: RetrainConfig::default(),
            storage: StorageConfig::default(),
            trainer: TrainerConfig::default(),
            publisher: PublisherConfig::default(),
        }
    }

    fn resolve(&self, explicit: &Option<PathBuf>, default: &[&str]) -> PathBuf {
        explicit.clone().unwrap_or_else(|| {
            default
                .iter()
                .fold(self.data_dir.clone(), |path, part| path.join(part))
        })
    }

    pub fn feedback_path(&self) -> PathBuf {
        self.resolve(&self.storage.feedback_file, &["feedback", "feedback.csv"])
    }

    pub fn registry_path(&self) -> PathBuf {
        self.resolve(&self.storage.registry_file, &["models", "versions", "registry.json"])
    }

    pub fn progress_path(&self) -> PathBuf {
        self.resolve(&self.storage.progress_file, &["retrain_progress.json"])
    }

    pub fn model_dir(&self) -> PathBuf {
        self.resolve(&self.storage.model_dir, &["models", "current"])
    }

    pub fn versions_dir(&self) -> PathBuf {
        self.resolve(&self.storage.versions_dir, &["models", "versions"])
    }

    pub fn base_corpus_path(&self) -> PathBuf {
        self.resolve(&self.storage.base_corpus, &["data", "corpus.csv"])
    }

    pub fn work_dir(&self) -> PathBuf {
        self.resolve(&self.storage.work_dir, &["work"])
    }

    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::hours(self.retrain.stale_after_hours as i64)
    }

    pub fn validate(&self) -> Result<()> {
        if self.retrain.threshold == 0 {
            bail!("retrain.threshold must be greater than 0");
        }
        if self.retrain.total_epochs == 0 {
            bail!("retrain.total_epochs must be greater than 0");
        }
        if self.retrain.stale_after_hours == 0 {
            bail!("retrain.stale_after_hours must be greater than 0");
        }
        if parse_version(&self.retrain.base_version).is_none() {
            bail!(
                "retrain.base_version '{}' must look like v<N>",
                self.retrain.base_version
            );
        }

        if let TrainerConfig::Subprocess { command, .. } = &self.trainer {
            if command.is_empty() {
                bail!("trainer.command must name a program to run");
            }
        }

        if let PublisherConfig::HubCli { repo, .. } = &self.publisher {
            if repo.trim().is_empty() {
                bail!("publisher.repo must not be empty");
            }
        }

        Ok(())
    }
}
