// Integration tests for the retrain pipeline: decision, training, archive,
// registry and publish working against real files

use anyhow::Result;
use std::fs;
use std::path::Path;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use hoaxlens::config::Config;
use hoaxlens::feedback::{FeedbackLog, Label, NewFeedback};
use hoaxlens::progress::{ProgressState, ProgressTracker, Stage};
use hoaxlens::publish::{ArtifactPublisher, DirectoryPublisher, DisabledPublisher, PublishOutcome, PublishTarget};
use hoaxlens::registry::ModelRegistry;
use hoaxlens::retrain::{RetrainOrchestrator, TriggerOutcome};
use hoaxlens::training::{
    BaselineTrainer, DeviceInfo, EpochProgress, TrainParams, TrainingBackend, TrainingDataset,
    TrainingOutput,
};
use hoaxlens::LifecycleError;

// ── fixtures ──

struct Harness {
    _dir: TempDir,
    config: Config,
    feedback: Arc<FeedbackLog>,
    registry: Arc<ModelRegistry>,
    progress: Arc<ProgressTracker>,
}

impl Harness {
    fn new() -> Result<Self> {
        let dir = TempDir::new()?;
        let mut config = Config::with_data_dir(dir.path().to_path_buf());
        config.retrain.threshold = 20;
        config.retrain.minimum_feedback = 10;

        let feedback = Arc::new(FeedbackLog::open(config.feedback_path())?);
        let registry = Arc::new(ModelRegistry::open(config.registry_path(), "v1"));
        let progress = Arc::new(ProgressTracker::load(config.progress_path(), config.stale_after()));

        Ok(Self {
            _dir: dir,
            config,
            feedback,
            registry,
            progress,
        })
    }

    fn orchestrator(
        &self,
        trainer: Box<dyn TrainingBackend>,
        publisher: Box<dyn ArtifactPublisher>,
    ) -> RetrainOrchestrator {
        RetrainOrchestrator::new(
            &self.config,
            Arc::clone(&self.feedback),
            Arc::clone(&self.registry),
            Arc::clone(&self.progress),
            trainer,
            publisher,
        )
        .with_device_probe(|| DeviceInfo::cpu("test cpu"))
    }

    fn write_corpus(&self, rows: usize) -> Result<()> {
        let path = self.config.base_corpus_path();
        fs::create_dir_all(path.parent().unwrap())?;
        let mut body = String::from("text,label\n");
        for i in 0..rows {
            body.push_str(&format!("berita korpus {},{}\n", i, i % 2));
        }
        fs::write(path, body)?;
        Ok(())
    }

    /// Append `n` predictions, labeling every other one
    fn add_feedback(&self, n: usize) -> Result<()> {
        for i in 0..n {
            let mut entry = NewFeedback::new(
                "indobert",
                "v1",
                format!("klaim nomor {}", i),
                Label::Hoax,
                0.85,
                0.85,
            );
            if i % 2 == 0 {
                entry = entry.with_user_label(if i % 4 == 0 { Label::Hoax } else { Label::Fact });
            }
            self.feedback.append(entry)?;
        }
        Ok(())
    }
}

struct FailingTrainer;

impl TrainingBackend for FailingTrainer {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn train(
        &self,
        _dataset: &TrainingDataset,
        _params: &TrainParams,
        on_epoch: &mut dyn FnMut(EpochProgress),
    ) -> Result<TrainingOutput> {
        on_epoch(EpochProgress { current: 1, total: 3 });
        Err(LifecycleError::TrainingFailure("CUDA out of memory".to_string()).into())
    }
}

/// Writes a model but reports nothing recognizable
struct SilentTrainer;

impl TrainingBackend for SilentTrainer {
    fn name(&self) -> &'static str {
        "silent"
    }

    fn train(
        &self,
        _dataset: &TrainingDataset,
        params: &TrainParams,
        _on_epoch: &mut dyn FnMut(EpochProgress),
    ) -> Result<TrainingOutput> {
        fs::create_dir_all(&params.output_dir)?;
        fs::write(params.output_dir.join("model.bin"), "weights")?;
        Ok(TrainingOutput {
            results: None,
            stdout: "done\n".to_string(),
        })
    }
}

/// Records the tracker's progress after each reported epoch
struct ObservingTrainer {
    progress: Arc<ProgressTracker>,
    seen: Arc<Mutex<Vec<(u32, u8, Stage)>>>,
}

impl TrainingBackend for ObservingTrainer {
    fn name(&self) -> &'static str {
        "observing"
    }

    fn train(
        &self,
        dataset: &TrainingDataset,
        params: &TrainParams,
        on_epoch: &mut dyn FnMut(EpochProgress),
    ) -> Result<TrainingOutput> {
        for current in 1..=params.total_epochs {
            on_epoch(EpochProgress {
                current,
                total: params.total_epochs,
            });
            let state = self.progress.get_state();
            self.seen.lock().unwrap().push((current, state.progress, state.stage));
        }
        BaselineTrainer.train(dataset, params, &mut |_| {})
    }
}

/// Blocks until released so a job can be observed mid-flight
struct GatedTrainer {
    gate: Mutex<Receiver<()>>,
}

impl GatedTrainer {
    fn new() -> (Self, Sender<()>) {
        let (tx, rx) = channel();
        (Self { gate: Mutex::new(rx) }, tx)
    }
}

impl TrainingBackend for GatedTrainer {
    fn name(&self) -> &'static str {
        "gated"
    }

    fn train(
        &self,
        dataset: &TrainingDataset,
        params: &TrainParams,
        on_epoch: &mut dyn FnMut(EpochProgress),
    ) -> Result<TrainingOutput> {
        let _ = self.gate.lock().unwrap().recv();
        BaselineTrainer.train(dataset, params, on_epoch)
    }
}

struct PanickingTrainer;

impl TrainingBackend for PanickingTrainer {
    fn name(&self) -> &'static str {
        "panicking"
    }

    fn train(
        &self,
        _dataset: &TrainingDataset,
        _params: &TrainParams,
        on_epoch: &mut dyn FnMut(EpochProgress),
    ) -> Result<TrainingOutput> {
        on_epoch(EpochProgress { current: 1, total: 3 });
        panic!("tokenizer vocabulary missing");
    }
}

/// Reports success without ever writing a model
struct NoArtifactTrainer;

impl TrainingBackend for NoArtifactTrainer {
    fn name(&self) -> &'static str {
        "no-artifact"
    }

    fn train(
        &self,
        _dataset: &TrainingDataset,
        _params: &TrainParams,
        _on_epoch: &mut dyn FnMut(EpochProgress),
    ) -> Result<TrainingOutput> {
        Ok(TrainingOutput {
            results: Some(serde_json::json!({ "accuracy": 0.9, "precision": 0.9, "recall": 0.9, "f1": 0.9 })),
            stdout: String::new(),
        })
    }
}

struct FailingPublisher;

impl ArtifactPublisher for FailingPublisher {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn publish(&self, _dir: &Path, _target: &PublishTarget) -> PublishOutcome {
        PublishOutcome::failed("503 Service Unavailable", "Upload failed")
    }
}

// ── successful runs ──

#[test]
fn test_full_retrain_advances_version() -> Result<()> {
    let h = Harness::new()?;
    h.write_corpus(40)?;
    h.add_feedback(30)?;

    let orchestrator = h.orchestrator(Box::new(BaselineTrainer), Box::new(DisabledPublisher));
    let outcome = match orchestrator.trigger(false, None)? {
        TriggerOutcome::Finished { outcome } => outcome,
        other => panic!("expected a finished run, got {:?}", other),
    };

    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(outcome.version.as_deref(), Some("v2"));
    assert_eq!(outcome.feedback_used, Some(30));
    assert!(!outcome.metrics_placeholder);
    assert!(outcome.publish.as_ref().unwrap().skipped);

    let state = h.registry.read();
    assert_eq!(state.current_version, "v2");
    assert_eq!(state.last_used_feedback_id, 30);
    assert_eq!(state.history.len(), 1);
    assert_eq!(state.history[0].feedback_rows_used, 30);
    assert!(state.history[0].metrics.contains_key("accuracy"));

    let archived = h.config.versions_dir().join("v2");
    assert!(archived.join("baseline.json").exists());

    let progress = h.progress.get_state();
    assert_eq!(progress.stage, Stage::Completed);
    assert_eq!(progress.progress, 100);
    assert!(!progress.is_running);

    // The consumed feedback no longer counts as new
    let decision = orchestrator.should_retrain(None);
    assert!(!decision.should_retrain);
    assert_eq!(decision.new_feedback_count, 0);
    Ok(())
}

#[test]
fn test_consecutive_retrains_increment_versions() -> Result<()> {
    let h = Harness::new()?;
    h.write_corpus(40)?;
    let orchestrator = h.orchestrator(Box::new(BaselineTrainer), Box::new(DisabledPublisher));

    h.add_feedback(20)?;
    assert_eq!(orchestrator.execute_retrain().version.as_deref(), Some("v2"));
    h.add_feedback(20)?;
    assert_eq!(orchestrator.execute_retrain().version.as_deref(), Some("v3"));

    let state = h.registry.read();
    assert_eq!(state.current_version, "v3");
    assert_eq!(state.last_used_feedback_id, 40);
    assert!(state.history[0].trained_at <= state.history[1].trained_at);
    Ok(())
}

#[test]
fn test_epoch_progress_reaches_tracker() -> Result<()> {
    let h = Harness::new()?;
    h.write_corpus(40)?;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let trainer = ObservingTrainer {
        progress: Arc::clone(&h.progress),
        seen: Arc::clone(&seen),
    };
    let orchestrator = h.orchestrator(Box::new(trainer), Box::new(DisabledPublisher));
    assert!(orchestrator.execute_retrain().success);

    let seen = seen.lock().unwrap().clone();
    assert_eq!(
        seen,
        vec![
            (1, 33, Stage::Training),
            (2, 56, Stage::Training),
            (3, 80, Stage::Training)
        ]
    );
    Ok(())
}

#[test]
fn test_placeholder_metrics_are_flagged() -> Result<()> {
    let h = Harness::new()?;
    h.write_corpus(40)?;

    let orchestrator = h.orchestrator(Box::new(SilentTrainer), Box::new(DisabledPublisher));
    let outcome = orchestrator.execute_retrain();

    assert!(outcome.success);
    assert!(outcome.metrics_placeholder);
    assert_eq!(outcome.metrics["accuracy"], 95.0);

    let state = h.registry.read();
    assert!(state.history[0].metrics_placeholder);
    Ok(())
}

// ── failures ──

#[test]
fn test_training_failure_leaves_registry_untouched() -> Result<()> {
    let h = Harness::new()?;
    h.write_corpus(40)?;
    h.add_feedback(30)?;
    let before = h.registry.read();

    let orchestrator = h.orchestrator(Box::new(FailingTrainer), Box::new(DisabledPublisher));
    let outcome = orchestrator.execute_retrain();

    assert!(!outcome.success);
    assert!(outcome.version.is_none());
    assert!(outcome.error.as_deref().unwrap().contains("CUDA out of memory"));

    assert_eq!(h.registry.read(), before);
    assert!(!h.config.versions_dir().join("v2").exists());

    let progress = h.progress.get_state();
    assert_eq!(progress.stage, Stage::Failed);
    assert!(!progress.is_running);
    assert!(progress.error.unwrap().contains("CUDA out of memory"));

    // The failed run did not consume feedback
    assert!(orchestrator.should_retrain(None).should_retrain);
    Ok(())
}

#[test]
fn test_panicking_backend_becomes_failed_outcome() -> Result<()> {
    let h = Harness::new()?;
    h.write_corpus(40)?;
    h.add_feedback(30)?;
    let before = h.registry.read();

    let orchestrator = h.orchestrator(Box::new(PanickingTrainer), Box::new(DisabledPublisher));
    let outcome = orchestrator.execute_retrain();

    assert!(!outcome.success);
    assert!(outcome.version.is_none());
    let error = outcome.error.unwrap();
    assert!(error.contains("tokenizer vocabulary missing"), "{}", error);

    let progress = h.progress.get_state();
    assert_eq!(progress.stage, Stage::Failed);
    assert!(!progress.is_running);
    assert!(progress.error.unwrap().contains("tokenizer vocabulary missing"));
    assert_eq!(h.registry.read(), before);

    // The tracker was released, so the next attempt runs
    let retry = h.orchestrator(Box::new(BaselineTrainer), Box::new(DisabledPublisher));
    let outcome = retry.execute_retrain();
    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(outcome.version.as_deref(), Some("v2"));
    Ok(())
}

#[tokio::test]
async fn test_panicking_backend_in_background_releases_tracker() -> Result<()> {
    let h = Harness::new()?;
    h.write_corpus(40)?;

    let orchestrator = Arc::new(h.orchestrator(Box::new(PanickingTrainer), Box::new(DisabledPublisher)));
    let outcome = orchestrator.spawn_background()?.await?;

    assert!(!outcome.success);
    let progress = h.progress.get_state();
    assert_eq!(progress.stage, Stage::Failed);
    assert!(!progress.is_running);
    Ok(())
}

#[test]
fn test_archive_failure_leaves_registry_untouched() -> Result<()> {
    let h = Harness::new()?;
    h.write_corpus(40)?;
    h.add_feedback(30)?;
    let before = h.registry.read();
    assert!(!h.config.model_dir().exists());

    let orchestrator = h.orchestrator(Box::new(NoArtifactTrainer), Box::new(DisabledPublisher));
    let outcome = orchestrator.execute_retrain();

    assert!(!outcome.success);
    assert!(outcome.version.is_none());
    assert_eq!(h.registry.read(), before);
    assert_eq!(h.registry.current_version(), "v1");
    assert!(!h.config.versions_dir().join("v2").exists());

    let progress = h.progress.get_state();
    assert_eq!(progress.stage, Stage::Failed);
    assert!(!progress.is_running);
    assert!(progress.error.is_some());

    // Nothing was consumed
    assert!(orchestrator.should_retrain(None).should_retrain);
    Ok(())
}

#[test]
fn test_too_little_data_fails_cleanly() -> Result<()> {
    let h = Harness::new()?;
    h.add_feedback(4)?;

    let orchestrator = h.orchestrator(Box::new(BaselineTrainer), Box::new(DisabledPublisher));
    let outcome = orchestrator.execute_retrain();

    assert!(!outcome.success);
    assert_eq!(h.registry.current_version(), "v1");
    assert_eq!(h.progress.get_state().stage, Stage::Failed);
    Ok(())
}

#[test]
fn test_publish_failure_keeps_new_version() -> Result<()> {
    let h = Harness::new()?;
    h.write_corpus(40)?;

    let orchestrator = h.orchestrator(Box::new(BaselineTrainer), Box::new(FailingPublisher));
    let outcome = orchestrator.execute_retrain();

    assert!(outcome.success);
    let publish = outcome.publish.unwrap();
    assert!(!publish.success);
    assert_eq!(publish.error.as_deref(), Some("503 Service Unavailable"));

    let state = h.registry.read();
    assert_eq!(state.current_version, "v2");
    assert_eq!(state.history.len(), 1);
    assert_eq!(h.progress.get_state().stage, Stage::Completed);
    Ok(())
}

// ── single flight ──

#[test]
fn test_second_job_refused_while_running() -> Result<()> {
    let h = Harness::new()?;
    h.write_corpus(40)?;
    h.progress.start(3);

    let orchestrator = h.orchestrator(Box::new(BaselineTrainer), Box::new(DisabledPublisher));
    assert!(matches!(
        orchestrator.trigger(true, None)?,
        TriggerOutcome::AlreadyRunning
    ));

    let outcome = orchestrator.execute_retrain();
    assert!(!outcome.success);
    assert_eq!(outcome.error.as_deref(), Some("a retrain job is already running"));

    // The running job's state was not disturbed
    let progress = h.progress.get_state();
    assert!(progress.is_running);
    assert_eq!(progress.stage, Stage::Preparing);
    assert_eq!(h.registry.current_version(), "v1");
    Ok(())
}

#[tokio::test]
async fn test_background_job_is_single_flight() -> Result<()> {
    let h = Harness::new()?;
    h.write_corpus(40)?;

    let (trainer, release) = GatedTrainer::new();
    let orchestrator = Arc::new(h.orchestrator(Box::new(trainer), Box::new(DisabledPublisher)));

    let handle = orchestrator.spawn_background()?;
    assert!(h.progress.get_state().is_running);

    let err = orchestrator.spawn_background().unwrap_err();
    assert!(matches!(
        err.downcast_ref::<LifecycleError>(),
        Some(LifecycleError::AlreadyRunning)
    ));

    release.send(())?;
    let outcome = handle.await?;
    assert!(outcome.success);
    assert_eq!(outcome.version.as_deref(), Some("v2"));
    assert!(!h.progress.get_state().is_running);
    Ok(())
}

#[test]
fn test_background_requires_runtime() -> Result<()> {
    let h = Harness::new()?;
    let orchestrator = Arc::new(h.orchestrator(Box::new(BaselineTrainer), Box::new(DisabledPublisher)));
    assert!(orchestrator.spawn_background().is_err());
    // Nothing was claimed
    assert!(!h.progress.get_state().is_running);
    Ok(())
}

// ── recovery ──

#[test]
fn test_stale_job_reset_on_startup() -> Result<()> {
    let h = Harness::new()?;
    h.write_corpus(40)?;

    let mut stale = ProgressState::idle(3);
    stale.is_running = true;
    stale.stage = Stage::Training;
    stale.progress = 45;
    stale.started_at = Some(chrono::Utc::now() - chrono::Duration::seconds(100_000));
    fs::write(h.config.progress_path(), serde_json::to_vec(&stale)?)?;

    let orchestrator = RetrainOrchestrator::from_config(&h.config)?
        .with_device_probe(|| DeviceInfo::cpu("test cpu"));
    let state = orchestrator.progress().get_state();
    assert!(!state.is_running);
    assert_eq!(state.stage, Stage::Idle);

    assert!(orchestrator.execute_retrain().success);
    Ok(())
}

// ── base version, rollback, republish ──

#[test]
fn test_initialize_base_version_archives_current_model() -> Result<()> {
    let h = Harness::new()?;
    let model_dir = h.config.model_dir();
    fs::create_dir_all(model_dir.join("checkpoint-10"))?;
    fs::write(model_dir.join("config.json"), "{}")?;

    let orchestrator = h.orchestrator(Box::new(BaselineTrainer), Box::new(DisabledPublisher));
    assert!(orchestrator.initialize_base_version()?);
    assert!(!orchestrator.initialize_base_version()?);

    let v1 = h.config.versions_dir().join("v1");
    assert!(v1.join("config.json").exists());
    assert!(!v1.join("checkpoint-10").exists());
    Ok(())
}

#[test]
fn test_rollback_then_retrain_uses_fresh_version() -> Result<()> {
    let h = Harness::new()?;
    h.write_corpus(40)?;
    let orchestrator = h.orchestrator(Box::new(BaselineTrainer), Box::new(DisabledPublisher));

    assert!(orchestrator.execute_retrain().success);
    assert!(orchestrator.execute_retrain().success);
    h.registry.rollback("v2")?;
    assert_eq!(h.registry.current_version(), "v2");

    let outcome = orchestrator.execute_retrain();
    assert_eq!(outcome.version.as_deref(), Some("v4"));
    assert_eq!(h.registry.versions(), vec!["v1", "v2", "v3", "v4"]);
    Ok(())
}

#[test]
fn test_republish_to_directory() -> Result<()> {
    let h = Harness::new()?;
    h.write_corpus(40)?;
    let mirror = h.config.data_dir.join("mirror");
    let orchestrator = h.orchestrator(
        Box::new(BaselineTrainer),
        Box::new(DirectoryPublisher::new(mirror.clone())),
    );

    let outcome = orchestrator.execute_retrain();
    assert!(outcome.publish.unwrap().success);
    fs::remove_dir_all(mirror.join("v2"))?;

    let again = orchestrator.republish("v2")?;
    assert!(again.success);
    assert!(mirror.join("v2").join("baseline.json").exists());
    let message = fs::read_to_string(mirror.join("v2").join("COMMIT_MESSAGE"))?;
    assert!(message.starts_with("Auto-retrain v2"));

    let err = orchestrator.republish("v9").unwrap_err();
    assert!(matches!(
        err.downcast_ref::<LifecycleError>(),
        Some(LifecycleError::UnknownVersion(_))
    ));
    Ok(())
}
