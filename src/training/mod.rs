// Training module
//
// The numerical training routine is an opaque collaborator. Backends get the
// assembled dataset and report epochs as they finish; metrics are extracted
// from whatever they return.

mod baseline;
mod dataset;
mod hardware;
mod metrics;
mod subprocess;

pub use baseline::BaselineTrainer;
pub use dataset::{load_corpus, LabeledText, SplitPaths, TrainingDataset};
pub use hardware::{probe, DeviceInfo};
pub use metrics::{extract, placeholder_metrics, MetricsReport, MetricsSource, METRIC_NAMES};
pub use subprocess::SubprocessTrainer;

use anyhow::Result;
use std::path::PathBuf;

use crate::config::TrainerConfig;

#[derive(Debug, Clone)]
pub struct TrainParams {
    pub total_epochs: u32,
    /// Where the trained model must end up (the current model directory)
    pub output_dir: PathBuf,
    /// Scratch space for splits and results
    pub work_dir: PathBuf,
    pub seed: u64,
    /// `cuda` or `cpu`, from the hardware probe
    pub device: String,
}

/// A finished epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochProgress {
    pub current: u32,
    pub total: u32,
}

/// Raw output of a training run
#[derive(Debug, Clone, Default)]
pub struct TrainingOutput {
    /// Structured results, if the backend produced any
    pub results: Option<serde_json::Value>,
    /// Captured standard output, scanned for metrics when `results` has none
    pub stdout: String,
}

pub trait TrainingBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Train a model into `params.output_dir`. Blocks until training ends.
    fn train(
        &self,
        dataset: &TrainingDataset,
        params: &TrainParams,
        on_epoch: &mut dyn FnMut(EpochProgress),
    ) -> Result<TrainingOutput>;
}

/// Build the configured backend
pub fn backend_from_config(config: &TrainerConfig) -> Result<Box<dyn TrainingBackend>> {
    Ok(match config {
        TrainerConfig::Subprocess {
            command,
            working_dir,
        } => Box::new(SubprocessTrainer::new(command.clone(), working_dir.clone())?),
        TrainerConfig::Baseline => Box::new(BaselineTrainer),
    })
}
