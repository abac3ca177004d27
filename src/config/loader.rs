// Configuration loader
// Loads settings from config.toml in the data directory, then applies
// environment overrides.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use super::settings::{default_data_dir, Config, PublisherConfig};

const CONFIG_FILE_NAME: &str = "config.toml";

/// Load configuration.
///
/// An explicit path must exist. Without one, `<data_dir>/config.toml` is used
/// when present and defaults otherwise. Environment overrides are applied last.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let env = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());

    let mut config = match explicit {
        Some(path) => read_config_file(path)?,
        None => {
            let data_dir = env("HOAXLENS_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(default_data_dir);
            let path = data_dir.join(CONFIG_FILE_NAME);
            if path.exists() {
                let mut config = read_config_file(&path)?;
                if config.data_dir == default_data_dir() {
                    config.data_dir = data_dir;
                }
                config
            } else {
                Config::with_data_dir(data_dir)
            }
        }
    };

    apply_env_overrides(&mut config, env)?;

    config
        .validate()
        .context("Configuration validation failed")?;

    tracing::debug!(data_dir = %config.data_dir.display(), "Configuration loaded");
    Ok(config)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Apply environment overrides using `lookup` to read variables.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(dir) = lookup("HOAXLENS_DATA_DIR") {
        config.data_dir = PathBuf::from(dir);
    }

    if let Some(threshold) = lookup("RETRAIN_THRESHOLD") {
        config.retrain.threshold = threshold
            .trim()
            .parse()
            .with_context(|| format!("Invalid RETRAIN_THRESHOLD: {}", threshold))?;
    }

    let upload_enabled = lookup("ENABLE_HF_UPLOAD").map(|v| v.trim().eq_ignore_ascii_case("true"));

    if upload_enabled == Some(false) {
        config.publisher = PublisherConfig::Disabled;
        return Ok(());
    }

    if let Some(repo) = lookup("HF_MODEL_REPO") {
        let token = lookup("HF_TOKEN");
        config.publisher = match std::mem::take(&mut config.publisher) {
            PublisherConfig::HubCli { cli, token: file_token, .. } => PublisherConfig::HubCli {
                repo,
                token: token.or(file_token),
                cli,
            },
            _ => PublisherConfig::HubCli {
                repo,
                token,
                cli: super::constants::DEFAULT_HUB_CLI.to_string(),
            },
        };
    } else if let Some(token) = lookup("HF_TOKEN") {
        if let PublisherConfig::HubCli { token: slot, .. } = &mut config.publisher {
            *slot = Some(token);
        }
    }

    Ok(())
}
