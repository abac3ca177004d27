// Progress tracker - single authoritative view of the retrain job
//
// One instance per process, shared by Arc. Every mutation is persisted so a
// status reader in another process sees the latest snapshot.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use super::state::{epoch_progress, ProgressState, Stage};
use crate::config::constants::{CPU_EPOCH_ESTIMATE_MINUTES, DEFAULT_TOTAL_EPOCHS};
use crate::errors::LifecycleError;
use crate::storage;

/// Partial update. Unset fields are left alone.
#[derive(Debug, Clone, Default)]
pub struct ProgressUpdate {
    pub progress: Option<u8>,
    pub stage: Option<Stage>,
    pub message: Option<String>,
    pub current_epoch: Option<u32>,
    pub error: Option<String>,
}

impl ProgressUpdate {
    pub fn stage(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage: Some(stage),
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn epoch(current_epoch: u32, message: impl Into<String>) -> Self {
        Self {
            current_epoch: Some(current_epoch),
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

pub struct ProgressTracker {
    path: PathBuf,
    state: Mutex<ProgressState>,
}

impl ProgressTracker {
    /// Load the persisted snapshot, resetting a running job older than `stale_after`
    pub fn load(path: PathBuf, stale_after: Duration) -> Self {
        let state = match Self::read_snapshot(&path) {
            Some(saved) if saved.is_stale(Utc::now(), stale_after) => {
                let err = LifecycleError::StaleJobDetected {
                    started_at: saved.started_at.unwrap_or_else(Utc::now),
                };
                warn!(error = %err, stage = %saved.stage, "Resetting abandoned retrain progress");
                let idle = ProgressState::idle(saved.total_epochs);
                persist(&path, &idle);
                idle
            }
            Some(saved) => saved,
            None => ProgressState::idle(DEFAULT_TOTAL_EPOCHS),
        };

        Self {
            path,
            state: Mutex::new(state),
        }
    }

    fn read_snapshot(path: &Path) -> Option<ProgressState> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not read retrain progress");
                return None;
            }
        };

        match serde_json::from_str(&contents) {
            Ok(state) => Some(state),
            Err(e) => {
                let err = LifecycleError::StorageCorruption {
                    path: path.to_path_buf(),
                    detail: e.to_string(),
                };
                warn!(error = %err, "Retrain progress unreadable, starting idle");
                None
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, ProgressState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Begin a run with the CPU-based completion estimate
    pub fn start(&self, total_epochs: u32) {
        self.start_with_estimate(
            total_epochs,
            Duration::minutes(CPU_EPOCH_ESTIMATE_MINUTES),
        );
    }

    /// Begin a run unconditionally, estimating completion as `per_epoch * total_epochs`
    pub fn start_with_estimate(&self, total_epochs: u32, per_epoch: Duration) {
        let mut state = self.lock();
        begin(&mut state, total_epochs, per_epoch);
        persist(&self.path, &state);
        info!(total_epochs, "Retrain progress tracking started");
    }

    /// Begin a run only if none is in flight
    pub fn try_start(&self, total_epochs: u32, per_epoch: Duration) -> Result<(), LifecycleError> {
        let mut state = self.lock();
        if state.is_running {
            debug!(stage = %state.stage, "Retrain start refused, job already running");
            return Err(LifecycleError::AlreadyRunning);
        }
        begin(&mut state, total_epochs, per_epoch);
        persist(&self.path, &state);
        info!(total_epochs, "Retrain progress tracking started");
        Ok(())
    }

    pub fn update(&self, update: ProgressUpdate) {
        let mut state = self.lock();

        if let Some(progress) = update.progress {
            state.progress = state.progress.max(progress.min(100));
        }
        if let Some(stage) = update.stage {
            state.stage = stage;
            if stage.is_terminal() {
                state.is_running = false;
            }
        }
        if let Some(message) = update.message.filter(|m| !m.is_empty()) {
            state.message = message;
        }
        if let Some(epoch) = update.current_epoch {
            state.current_epoch = epoch;
            let derived = epoch_progress(epoch, state.total_epochs);
            state.progress = state.progress.max(derived);
        }
        if let Some(error) = update.error.filter(|e| !e.is_empty()) {
            state.error = Some(error);
            state.stage = Stage::Failed;
            state.is_running = false;
        }

        persist(&self.path, &state);
        debug!(progress = state.progress, stage = %state.stage, message = %state.message, "Retrain progress");
    }

    /// Finish the run. A failure without a recorded error records `message` as the error.
    pub fn complete(&self, success: bool, message: impl Into<String>) {
        let message = message.into();
        let mut state = self.lock();

        state.is_running = false;
        state.progress = 100;
        state.stage = if success { Stage::Completed } else { Stage::Failed };
        if !success && state.error.is_none() {
            state.error = Some(message.clone());
        }
        state.message = message;

        persist(&self.path, &state);
        info!(success, message = %state.message, "Retrain progress tracking completed");
    }

    /// Return to idle. Does not stop a trainer that is still running.
    pub fn reset(&self) {
        let mut state = self.lock();
        *state = ProgressState::idle(state.total_epochs);
        persist(&self.path, &state);
        info!("Retrain progress reset");
    }

    pub fn get_state(&self) -> ProgressState {
        self.lock().clone()
    }
}

fn begin(state: &mut ProgressState, total_epochs: u32, per_epoch: Duration) {
    // Whole seconds, matching the on-disk resolution
    let now = Utc::now().trunc_subsecs(0);
    *state = ProgressState {
        is_running: true,
        progress: 0,
        stage: Stage::Preparing,
        message: "Preparing retrain...".to_string(),
        started_at: Some(now),
        estimated_completion: estimate_completion(now, per_epoch, total_epochs),
        current_epoch: 0,
        total_epochs,
        error: None,
    };
}

/// `now + per_epoch * total_epochs`, or None when that leaves the representable range
fn estimate_completion(
    now: DateTime<Utc>,
    per_epoch: Duration,
    total_epochs: u32,
) -> Option<DateTime<Utc>> {
    let epochs = i32::try_from(total_epochs.max(1)).ok()?;
    per_epoch
        .checked_mul(epochs)
        .and_then(|total| now.checked_add_signed(total))
}

fn persist(path: &Path, state: &ProgressState) {
    let result = serde_json::to_vec_pretty(state)
        .map_err(anyhow::Error::from)
        .and_then(|json| storage::write_atomic(path, &json));
    if let Err(e) = result {
        error!(path = %path.display(), error = %e, "Could not save retrain progress");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::state::IDLE_MESSAGE;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn tracker_in_tempdir() -> (ProgressTracker, TempDir) {
        let dir = TempDir::new().unwrap();
        let tracker = ProgressTracker::load(dir.path().join("retrain_progress.json"), Duration::hours(24));
        (tracker, dir)
    }

    // ── lifecycle ──

    #[test]
    fn test_fresh_tracker_is_idle() {
        let (tracker, _dir) = tracker_in_tempdir();
        let state = tracker.get_state();
        assert!(!state.is_running);
        assert_eq!(state.stage, Stage::Idle);
        assert_eq!(state.progress, 0);
        assert_eq!(state.message, IDLE_MESSAGE);
    }

    #[test]
    fn test_start_sets_preparing_and_estimate() {
        let (tracker, _dir) = tracker_in_tempdir();
        tracker.start(3);

        let state = tracker.get_state();
        assert!(state.is_running);
        assert_eq!(state.stage, Stage::Preparing);
        assert_eq!(state.total_epochs, 3);
        let started = state.started_at.unwrap();
        let eta = state.estimated_completion.unwrap();
        assert_eq!(eta - started, Duration::hours(10));
    }

    #[test]
    fn test_huge_epoch_count_drops_estimate() {
        let (tracker, _dir) = tracker_in_tempdir();

        tracker.start(u32::MAX);
        let state = tracker.get_state();
        assert!(state.is_running);
        assert_eq!(state.total_epochs, u32::MAX);
        assert!(state.estimated_completion.is_none());

        // Fits in i32 but lands past the last representable date
        tracker.start_with_estimate(1_000_000_000, Duration::minutes(200));
        assert!(tracker.get_state().estimated_completion.is_none());

        tracker.start_with_estimate(3, Duration::minutes(20));
        let state = tracker.get_state();
        assert_eq!(
            state.estimated_completion.unwrap() - state.started_at.unwrap(),
            Duration::hours(1)
        );
    }

    #[test]
    fn test_epoch_updates_drive_progress() {
        let (tracker, _dir) = tracker_in_tempdir();
        tracker.start(3);
        tracker.update(ProgressUpdate::stage(Stage::Training, "Training").with_progress(10));

        tracker.update(ProgressUpdate::epoch(1, "Epoch 1/3"));
        assert_eq!(tracker.get_state().progress, 33);
        tracker.update(ProgressUpdate::epoch(2, "Epoch 2/3"));
        assert_eq!(tracker.get_state().progress, 56);
        tracker.update(ProgressUpdate::epoch(3, "Epoch 3/3"));

        let state = tracker.get_state();
        assert_eq!(state.progress, 80);
        assert_eq!(state.current_epoch, 3);
        assert_eq!(state.message, "Epoch 3/3");
    }

    #[test]
    fn test_progress_never_decreases_within_run() {
        let (tracker, _dir) = tracker_in_tempdir();
        tracker.start(3);
        tracker.update(ProgressUpdate::default().with_progress(85));
        tracker.update(ProgressUpdate::default().with_progress(40));
        tracker.update(ProgressUpdate::epoch(1, "late epoch report"));
        assert_eq!(tracker.get_state().progress, 85);
    }

    #[test]
    fn test_progress_clamped_to_100() {
        let (tracker, _dir) = tracker_in_tempdir();
        tracker.start(3);
        tracker.update(ProgressUpdate::default().with_progress(250));
        assert_eq!(tracker.get_state().progress, 100);
    }

    #[test]
    fn test_error_update_fails_job() {
        let (tracker, _dir) = tracker_in_tempdir();
        tracker.start(3);
        tracker.update(ProgressUpdate::error("CUDA out of memory"));

        let state = tracker.get_state();
        assert!(!state.is_running);
        assert_eq!(state.stage, Stage::Failed);
        assert_eq!(state.error.as_deref(), Some("CUDA out of memory"));
    }

    #[test]
    fn test_complete_success_and_failure() {
        let (tracker, _dir) = tracker_in_tempdir();
        tracker.start(3);
        tracker.complete(true, "Retrain completed: v2");
        let state = tracker.get_state();
        assert_eq!(state.stage, Stage::Completed);
        assert_eq!(state.progress, 100);
        assert!(!state.is_running);
        assert!(state.error.is_none());

        tracker.start(3);
        tracker.complete(false, "Training failed");
        let state = tracker.get_state();
        assert_eq!(state.stage, Stage::Failed);
        assert_eq!(state.error.as_deref(), Some("Training failed"));
    }

    #[test]
    fn test_complete_failure_keeps_earlier_error() {
        let (tracker, _dir) = tracker_in_tempdir();
        tracker.start(3);
        tracker.update(ProgressUpdate::error("disk full"));
        tracker.complete(false, "Retrain failed");
        assert_eq!(tracker.get_state().error.as_deref(), Some("disk full"));
    }

    #[test]
    fn test_reset_returns_to_idle() {
        let (tracker, _dir) = tracker_in_tempdir();
        tracker.start(5);
        tracker.update(ProgressUpdate::epoch(2, "Epoch 2/5"));
        tracker.reset();

        let state = tracker.get_state();
        assert_eq!(state, ProgressState::idle(5));
    }

    // ── single flight ──

    #[test]
    fn test_try_start_refuses_second_job() {
        let (tracker, _dir) = tracker_in_tempdir();
        tracker.try_start(3, Duration::minutes(1)).unwrap();
        assert!(matches!(
            tracker.try_start(3, Duration::minutes(1)),
            Err(LifecycleError::AlreadyRunning)
        ));

        tracker.complete(true, "done");
        assert!(tracker.try_start(3, Duration::minutes(1)).is_ok());
    }

    #[test]
    fn test_try_start_concurrent_only_one_wins() {
        let (tracker, _dir) = tracker_in_tempdir();
        let tracker = Arc::new(tracker);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || tracker.try_start(3, Duration::minutes(1)).is_ok())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    // ── persistence ──

    #[test]
    fn test_every_mutation_is_persisted() {
        let (tracker, _dir) = tracker_in_tempdir();
        tracker.start(3);
        tracker.update(ProgressUpdate::stage(Stage::Training, "Training model...").with_progress(10));

        let reloaded = ProgressTracker::load(tracker.path().to_path_buf(), Duration::hours(24));
        assert_eq!(reloaded.get_state(), tracker.get_state());
    }

    #[test]
    fn test_stale_running_snapshot_is_reset_on_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("retrain_progress.json");

        let mut stale = ProgressState::idle(3);
        stale.is_running = true;
        stale.stage = Stage::Training;
        stale.progress = 40;
        stale.started_at = Some(Utc::now() - Duration::seconds(100_000));
        storage::write_atomic(&path, &serde_json::to_vec(&stale).unwrap()).unwrap();

        let tracker = ProgressTracker::load(path.clone(), Duration::hours(24));
        let state = tracker.get_state();
        assert!(!state.is_running);
        assert_eq!(state.stage, Stage::Idle);
        assert_eq!(state.progress, 0);

        // The reset is persisted too
        let on_disk: ProgressState =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk.stage, Stage::Idle);
    }

    #[test]
    fn test_recent_running_snapshot_survives_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("retrain_progress.json");

        let mut running = ProgressState::idle(3);
        running.is_running = true;
        running.stage = Stage::Training;
        running.progress = 40;
        running.started_at = Some(Utc::now() - Duration::hours(2));
        storage::write_atomic(&path, &serde_json::to_vec(&running).unwrap()).unwrap();

        let tracker = ProgressTracker::load(path, Duration::hours(24));
        let state = tracker.get_state();
        assert!(state.is_running);
        assert_eq!(state.progress, 40);
    }

    #[test]
    fn test_corrupt_snapshot_loads_idle() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("retrain_progress.json");
        std::fs::write(&path, "not json at all").unwrap();

        let tracker = ProgressTracker::load(path, Duration::hours(24));
        assert_eq!(tracker.get_state().stage, Stage::Idle);
    }

    #[test]
    fn test_persist_failure_is_not_propagated() {
        let dir = TempDir::new().unwrap();
        // Parent "directory" is a regular file, so every write fails
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "x").unwrap();
        let tracker = ProgressTracker::load(blocker.join("progress.json"), Duration::hours(24));

        tracker.start(3);
        tracker.complete(true, "done");
        assert_eq!(tracker.get_state().stage, Stage::Completed);
    }
}
