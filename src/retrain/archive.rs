// Version archive - immutable per-version copies of the trained model
//
// A version directory only appears once fully copied: content is staged in a
// hidden sibling and renamed into place.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::constants::CHECKPOINT_DIR_PREFIX;
use crate::storage;

pub struct ModelArchive {
    versions_dir: PathBuf,
}

impl ModelArchive {
    pub fn new(versions_dir: PathBuf) -> Self {
        Self { versions_dir }
    }

    pub fn version_dir(&self, version: &str) -> PathBuf {
        self.versions_dir.join(version)
    }

    pub fn contains(&self, version: &str) -> bool {
        self.version_dir(version).is_dir()
    }

    /// Copy `model_dir` to `<versions_dir>/<version>`, leaving out training checkpoints
    pub fn archive(&self, model_dir: &Path, version: &str) -> Result<PathBuf> {
        if !model_dir.is_dir() {
            bail!("Model directory not found: {}", model_dir.display());
        }

        let staging = self.versions_dir.join(format!(".{}.partial", version));
        if staging.exists() {
            fs::remove_dir_all(&staging)
                .with_context(|| format!("Failed to clear {}", staging.display()))?;
        }

        let files = storage::copy_tree(model_dir, &staging, |name| {
            name.starts_with(CHECKPOINT_DIR_PREFIX)
        })?;

        let dest = self.version_dir(version);
        if dest.exists() {
            // Left behind by a run that died before the registry recorded it
            warn!(dest = %dest.display(), "Replacing unregistered version directory");
            fs::remove_dir_all(&dest)
                .with_context(|| format!("Failed to remove {}", dest.display()))?;
        }
        fs::rename(&staging, &dest).with_context(|| {
            format!("Failed to move {} to {}", staging.display(), dest.display())
        })?;

        info!(version = %version, files, dest = %dest.display(), "Model archived");
        Ok(dest)
    }

    /// Archive the current model as the base version unless that already exists.
    /// Returns whether anything was archived.
    pub fn initialize_base(&self, model_dir: &Path, base_version: &str) -> Result<bool> {
        if self.contains(base_version) {
            debug!(version = %base_version, "Base version already archived");
            return Ok(false);
        }
        if !model_dir.is_dir() {
            warn!(model_dir = %model_dir.display(), "No model to archive as base version");
            return Ok(false);
        }
        self.archive(model_dir, base_version)?;
        Ok(true)
    }
}
