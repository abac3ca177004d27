// Hugging Face Hub publisher
// Shells out to `huggingface-cli upload`, one branch per version.

use std::path::Path;
use std::process::Command;
use tracing::{error, info, warn};

use super::{ArtifactPublisher, PublishOutcome, PublishTarget};
use crate::errors::LifecycleError;

pub struct HubCliPublisher {
    repo: String,
    token: Option<String>,
    cli: String,
}

impl HubCliPublisher {
    pub fn new(repo: String, token: Option<String>, cli: String) -> Self {
        Self { repo, token, cli }
    }

    pub fn location(&self, version: &str) -> String {
        format!("https://huggingface.co/{}/tree/{}", self.repo, version)
    }

    fn upload_args(&self, dir: &Path, target: &PublishTarget) -> Vec<String> {
        vec![
            "upload".to_string(),
            self.repo.clone(),
            dir.display().to_string(),
            ".".to_string(),
            "--revision".to_string(),
            target.version.clone(),
            "--commit-message".to_string(),
            target.commit_message.clone(),
        ]
    }
}

impl ArtifactPublisher for HubCliPublisher {
    fn name(&self) -> &'static str {
        "hub-cli"
    }

    fn publish(&self, dir: &Path, target: &PublishTarget) -> PublishOutcome {
        let Some(token) = self.token.as_deref().filter(|t| !t.is_empty()) else {
            warn!("Hub token not configured, skipping upload");
            return PublishOutcome::failed(
                "No HuggingFace token configured",
                "Set HF_TOKEN to enable auto-upload",
            );
        };

        if !dir.is_dir() {
            let err = LifecycleError::PublishFailure(format!(
                "model version directory not found: {}",
                dir.display()
            ));
            error!(error = %err, "Upload aborted");
            return PublishOutcome::failed(err.to_string(), format!("Upload failed: {}", err));
        }

        info!(repo = %self.repo, version = %target.version, "Uploading model to Hugging Face Hub");
        // Token goes through the environment so it never shows up in process listings
        let output = Command::new(&self.cli)
            .args(self.upload_args(dir, target))
            .env("HF_TOKEN", token)
            .output();

        match output {
            Ok(out) if out.status.success() => {
                let location = self.location(&target.version);
                info!(url = %location, "Model uploaded");
                PublishOutcome::published(
                    location,
                    format!("Model uploaded to {} at {} branch", self.repo, target.version),
                )
            }
            Ok(out) => {
                let err = LifecycleError::PublishFailure(format!(
                    "{} exited with {}: {}",
                    self.cli,
                    out.status,
                    String::from_utf8_lossy(&out.stderr).trim()
                ));
                error!(error = %err, "Upload failed");
                PublishOutcome::failed(err.to_string(), format!("Upload failed: {}", err))
            }
            Err(e) => {
                let err = LifecycleError::PublishFailure(format!("could not run {}: {}", self.cli, e));
                error!(error = %err, "Upload failed");
                PublishOutcome::failed(err.to_string(), format!("Upload failed: {}", err))
            }
        }
    }
}
