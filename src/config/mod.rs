// Configuration module
// Public interface for configuration loading

pub mod constants;
mod loader;
mod settings;

pub use loader::{apply_env_overrides, load_config};
pub use settings::{
    default_data_dir, Config, PublisherConfig, RetrainConfig, StorageConfig, TrainerConfig,
};
