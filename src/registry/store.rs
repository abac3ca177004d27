// Model registry - durable catalog of model versions

use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

use super::state::{parse_version, Metrics, RegistryState, RetrainEntry};
use crate::errors::LifecycleError;
use crate::storage;

/// File-backed registry. Every write replaces the file atomically.
pub struct ModelRegistry {
    path: PathBuf,
    base_version: String,
    write_lock: Mutex<()>,
}

impl ModelRegistry {
    pub fn open(path: PathBuf, base_version: impl Into<String>) -> Self {
        Self {
            path,
            base_version: base_version.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn base_version(&self) -> &str {
        &self.base_version
    }

    /// Load the registry, initializing defaults when the file is absent.
    ///
    /// A corrupt file is reported and read as defaults; it is left in place
    /// until the next successful write replaces it.
    pub fn read(&self) -> RegistryState {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let state = RegistryState::new(&self.base_version);
                if let Err(e) = self.write(&state) {
                    warn!(error = %e, "Could not initialize model registry");
                }
                return state;
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Could not read model registry, using defaults");
                return RegistryState::new(&self.base_version);
            }
        };

        match serde_json::from_str(&contents) {
            Ok(state) => state,
            Err(e) => {
                let err = LifecycleError::StorageCorruption {
                    path: self.path.clone(),
                    detail: e.to_string(),
                };
                warn!(error = %err, "Model registry unreadable, using defaults");
                RegistryState::new(&self.base_version)
            }
        }
    }

    /// Persist the full state
    pub fn write(&self, state: &RegistryState) -> Result<()> {
        let json = serde_json::to_vec_pretty(state).context("Failed to serialize registry")?;
        storage::write_atomic(&self.path, &json)
            .with_context(|| format!("Failed to write registry: {}", self.path.display()))
    }

    pub fn current_version(&self) -> String {
        self.read().current_version
    }

    /// Version the next retrain will be published as. Does not mutate state.
    pub fn next_version(&self) -> String {
        self.read().next_version()
    }

    /// Base version followed by every retrained version, oldest first
    pub fn versions(&self) -> Vec<String> {
        let state = self.read();
        std::iter::once(self.base_version.clone())
            .chain(state.history.into_iter().map(|e| e.version))
            .collect()
    }

    /// Register a freshly archived version and make it current.
    ///
    /// `feedback_rows_used` also becomes the consumed-feedback marker: ids are
    /// dense from 1, so the row count is the highest id the run saw.
    pub fn record_retrain(
        &self,
        version: &str,
        metrics: Metrics,
        feedback_rows_used: u32,
        metrics_placeholder: bool,
    ) -> Result<RetrainEntry> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut state = self.read();

        let Some(number) = parse_version(version) else {
            bail!("Version '{}' is not of the form v<N>", version);
        };
        if number <= state.highest_version_number() {
            bail!(
                "Version {} is not newer than every registered version ({})",
                version,
                state.current_version
            );
        }

        let entry = RetrainEntry {
            version: version.to_string(),
            trained_at: Utc::now(),
            feedback_rows_used,
            metrics,
            metrics_placeholder,
        };

        state.history.push(entry.clone());
        state.current_version = version.to_string();
        state.last_used_feedback_id = u64::from(feedback_rows_used);
        self.write(&state)?;

        info!(version = %version, feedback_rows_used, "Registry updated");
        Ok(entry)
    }

    /// Point `current_version` at an existing version. History is untouched.
    pub fn rollback(&self, version: &str) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut state = self.read();

        let known = version == self.base_version || state.entry(version).is_some();
        if !known {
            return Err(LifecycleError::UnknownVersion(version.to_string()).into());
        }

        let previous = std::mem::replace(&mut state.current_version, version.to_string());
        self.write(&state)?;

        info!(from = %previous, to = %version, "Rolled back current model version");
        Ok(())
    }
}
