// Directory publisher - mirrors archived versions into another directory tree

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

use super::{ArtifactPublisher, PublishOutcome, PublishTarget};
use crate::errors::LifecycleError;
use crate::storage;

pub struct DirectoryPublisher {
    root: PathBuf,
}

impl DirectoryPublisher {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn mirror(&self, dir: &Path, target: &PublishTarget) -> anyhow::Result<PathBuf> {
        if !dir.is_dir() {
            return Err(LifecycleError::PublishFailure(format!(
                "model version directory not found: {}",
                dir.display()
            ))
            .into());
        }

        let dest = self.root.join(&target.version);
        if dest.exists() {
            fs::remove_dir_all(&dest)?;
        }
        storage::copy_tree(dir, &dest, |_| false)?;
        fs::write(dest.join("COMMIT_MESSAGE"), &target.commit_message)?;
        Ok(dest)
    }
}

impl ArtifactPublisher for DirectoryPublisher {
    fn name(&self) -> &'static str {
        "directory"
    }

    fn publish(&self, dir: &Path, target: &PublishTarget) -> PublishOutcome {
        match self.mirror(dir, target) {
            Ok(dest) => {
                info!(version = %target.version, dest = %dest.display(), "Model mirrored");
                PublishOutcome::published(
                    dest.display().to_string(),
                    format!("Model {} mirrored to {}", target.version, self.root.display()),
                )
            }
            Err(e) => {
                error!(version = %target.version, error = %e, "Mirror failed");
                PublishOutcome::failed(format!("{:#}", e), format!("Mirror failed: {}", e))
            }
        }
    }
}
