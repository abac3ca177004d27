// Retrain orchestrator - drives one job from dataset to published version
//
// Pipeline: single-flight start -> dataset -> train -> metrics -> archive ->
// registry -> publish. The registry is only touched once the archive exists,
// and a publish failure never undoes a recorded version.

use anyhow::{anyhow, Context, Result};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::archive::ModelArchive;
use super::decision::{self, RetrainDecision};
use super::outcome::{RetrainOutcome, TriggerOutcome};
use crate::config::{Config, RetrainConfig};
use crate::errors::LifecycleError;
use crate::feedback::FeedbackLog;
use crate::progress::{ProgressTracker, ProgressUpdate, Stage};
use crate::publish::{self, ArtifactPublisher, PublishOutcome, PublishTarget};
use crate::registry::ModelRegistry;
use crate::training::{self, DeviceInfo, TrainParams, TrainingBackend, TrainingDataset};

type DeviceProbe = Box<dyn Fn() -> DeviceInfo + Send + Sync>;

pub struct RetrainOrchestrator {
    settings: RetrainConfig,
    feedback: Arc<FeedbackLog>,
    registry: Arc<ModelRegistry>,
    progress: Arc<ProgressTracker>,
    archive: ModelArchive,
    trainer: Box<dyn TrainingBackend>,
    publisher: Box<dyn ArtifactPublisher>,
    device_probe: DeviceProbe,
    model_dir: PathBuf,
    corpus_path: PathBuf,
    work_dir: PathBuf,
}

impl RetrainOrchestrator {
    pub fn new(
        config: &Config,
        feedback: Arc<FeedbackLog>,
        registry: Arc<ModelRegistry>,
        progress: Arc<ProgressTracker>,
        trainer: Box<dyn TrainingBackend>,
        publisher: Box<dyn ArtifactPublisher>,
    ) -> Self {
        Self {
            settings: config.retrain.clone(),
            feedback,
            registry,
            progress,
            archive: ModelArchive::new(config.versions_dir()),
            trainer,
            publisher,
            device_probe: Box::new(training::probe),
            model_dir: config.model_dir(),
            corpus_path: config.base_corpus_path(),
            work_dir: config.work_dir(),
        }
    }

    /// Open every store and select the backends named in `config`
    pub fn from_config(config: &Config) -> Result<Self> {
        let feedback = Arc::new(FeedbackLog::open(config.feedback_path())?);
        let registry = Arc::new(ModelRegistry::open(
            config.registry_path(),
            config.retrain.base_version.clone(),
        ));
        let progress = Arc::new(ProgressTracker::load(
            config.progress_path(),
            config.stale_after(),
        ));
        let trainer = training::backend_from_config(&config.trainer)
            .context("Failed to set up training backend")?;
        let publisher = publish::publisher_from_config(&config.publisher);

        info!(
            trainer = trainer.name(),
            publisher = publisher.name(),
            data_dir = %config.data_dir.display(),
            "Retrain orchestrator ready"
        );
        Ok(Self::new(config, feedback, registry, progress, trainer, publisher))
    }

    /// Replace hardware detection (tests, or hosts where probing is undesirable)
    pub fn with_device_probe<F>(mut self, probe: F) -> Self
    where
        F: Fn() -> DeviceInfo + Send + Sync + 'static,
    {
        self.device_probe = Box::new(probe);
        self
    }

    pub fn feedback(&self) -> &Arc<FeedbackLog> {
        &self.feedback
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn progress(&self) -> &Arc<ProgressTracker> {
        &self.progress
    }

    pub fn archive(&self) -> &ModelArchive {
        &self.archive
    }

    pub fn should_retrain(&self, threshold: Option<u32>) -> RetrainDecision {
        decision::should_retrain(&self.feedback, &self.registry, &self.settings, threshold)
    }

    /// Run a full retrain on the calling thread. Never returns an error: every
    /// failure becomes a failed outcome and a `failed` progress state.
    pub fn execute_retrain(&self) -> RetrainOutcome {
        match self.begin() {
            Ok(device) => self.finish(device),
            Err(e) => {
                warn!(error = %e, "Retrain not started");
                RetrainOutcome {
                    message: e.to_string(),
                    ..RetrainOutcome::failed(e.to_string(), None)
                }
            }
        }
    }

    /// Decision check (unless forced), then a full run
    pub fn trigger(&self, force: bool, threshold: Option<u32>) -> Result<TriggerOutcome> {
        if !force {
            let decision = self.should_retrain(threshold);
            if !decision.should_retrain {
                info!(reason = %decision.reason, "Retrain skipped");
                return Ok(TriggerOutcome::Skipped { decision });
            }
        }

        match self.begin() {
            Ok(device) => Ok(TriggerOutcome::Finished {
                outcome: self.finish(device),
            }),
            Err(LifecycleError::AlreadyRunning) => Ok(TriggerOutcome::AlreadyRunning),
            Err(e) => Err(e.into()),
        }
    }

    /// Claim the tracker now and run the pipeline on a blocking worker.
    ///
    /// Fails immediately with `AlreadyRunning` when a job is in flight. Must be
    /// called from within a Tokio runtime.
    pub fn spawn_background(self: &Arc<Self>) -> Result<JoinHandle<RetrainOutcome>> {
        let handle = tokio::runtime::Handle::try_current()
            .context("Background retrain requires a Tokio runtime")?;

        let device = self.begin()?;
        let this = Arc::clone(self);
        info!("Retrain running in background");
        Ok(handle.spawn_blocking(move || this.finish(device)))
    }

    /// Archive the current model as the base version if it is not archived yet
    pub fn initialize_base_version(&self) -> Result<bool> {
        self.archive
            .initialize_base(&self.model_dir, self.registry.base_version())
    }

    /// Publish an already archived version again
    pub fn republish(&self, version: &str) -> Result<PublishOutcome> {
        let state = self.registry.read();
        let entry = state.entry(version);
        if entry.is_none() && version != self.registry.base_version() {
            return Err(LifecycleError::UnknownVersion(version.to_string()).into());
        }

        let target = PublishTarget::for_version(version, entry);
        Ok(self
            .publisher
            .publish(&self.archive.version_dir(version), &target))
    }

    /// Single-flight start
    fn begin(&self) -> Result<DeviceInfo, LifecycleError> {
        let device = (self.device_probe)();
        self.progress
            .try_start(self.settings.total_epochs, device.per_epoch_estimate())?;
        self.progress.update(
            ProgressUpdate::stage(Stage::Preparing, "Checking environment...").with_progress(5),
        );
        info!(device = %device.device_name, "Starting retrain process");
        Ok(device)
    }

    /// Run the claimed job to completion, converting errors into a failed outcome
    fn finish(&self, device: DeviceInfo) -> RetrainOutcome {
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.run_pipeline(&device)))
            .unwrap_or_else(|payload| Err(anyhow!("pipeline panicked: {}", panic_message(&*payload))));

        match result {
            Ok(outcome) => outcome,
            Err(e) => {
                let detail = format!("{:#}", e);
                error!(error = %detail, "Retrain failed");
                self.progress
                    .complete(false, format!("Training failed: {}", detail));
                RetrainOutcome::failed(detail, Some(device))
            }
        }
    }

    fn run_pipeline(&self, device: &DeviceInfo) -> Result<RetrainOutcome> {
        let progress = &self.progress;

        progress.update(ProgressUpdate {
            progress: Some(10),
            message: Some("Environment checked, assembling dataset...".to_string()),
            ..Default::default()
        });
        let dataset =
            TrainingDataset::assemble(&self.corpus_path, &self.feedback, self.settings.split_seed)?;
        let feedback_used = dataset.feedback_seen;

        progress.update(
            ProgressUpdate::stage(
                Stage::Training,
                format!("Training on {} rows ({})...", dataset.len(), device.device_name),
            )
            .with_progress(10),
        );
        let params = TrainParams {
            total_epochs: self.settings.total_epochs,
            output_dir: self.model_dir.clone(),
            work_dir: self.work_dir.clone(),
            seed: self.settings.split_seed,
            device: device.device.clone(),
        };
        let output = self
            .trainer
            .train(&dataset, &params, &mut |epoch| {
                progress.update(ProgressUpdate::epoch(
                    epoch.current,
                    format!("Epoch {}/{}", epoch.current, epoch.total),
                ));
            })
            .map_err(|e| {
                progress.update(ProgressUpdate::error(format!("{:#}", e)));
                e
            })?;

        progress.update(
            ProgressUpdate::stage(Stage::Evaluating, "Training completed, evaluating model...")
                .with_progress(80),
        );
        let report = training::extract(output.results.as_ref(), &output.stdout);

        let version = self.registry.next_version();
        progress.update(
            ProgressUpdate::stage(Stage::Saving, format!("Saving model as {}...", version))
                .with_progress(85),
        );
        let archived = self.archive.archive(&self.model_dir, &version)?;
        let entry = self.registry.record_retrain(
            &version,
            report.metrics.clone(),
            feedback_used,
            report.is_placeholder(),
        )?;

        progress.update(
            ProgressUpdate::stage(Stage::Uploading, format!("Publishing {}...", version))
                .with_progress(90),
        );
        let target = PublishTarget::for_version(&version, Some(&entry));
        let published = self.publisher.publish(&archived, &target);
        if !published.success && !published.skipped {
            warn!(version = %version, error = ?published.error, "Version recorded but not published");
        }

        let message = format!(
            "Model {} successfully trained on {}{}",
            version,
            device.device_name,
            if published.success { " and published" } else { "" }
        );
        progress.complete(true, message.clone());
        info!(version = %version, feedback_used, placeholder = report.is_placeholder(), "Retrain completed");

        Ok(RetrainOutcome {
            success: true,
            version: Some(version),
            metrics_placeholder: report.is_placeholder(),
            metrics: report.metrics,
            feedback_used: Some(feedback_used),
            device: Some(device.clone()),
            publish: Some(published),
            message,
            error: None,
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
