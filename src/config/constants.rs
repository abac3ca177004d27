// Project-wide constants
//
// Centralised here so thresholds and other magic values have one
// source of truth. Import via `use crate::config::constants::*;`.

/// Directory under $HOME holding all lifecycle state.
pub const DATA_DIR_NAME: &str = ".hoaxlens";

/// New labeled feedback rows needed before an automatic retrain.
pub const DEFAULT_RETRAIN_THRESHOLD: u32 = 100;

/// Total feedback rows required regardless of how many are new.
pub const DEFAULT_MINIMUM_FEEDBACK: u32 = 50;

/// Running jobs older than this are considered abandoned.
pub const DEFAULT_STALE_AFTER_HOURS: u64 = 24;

/// Version marker prefix (v1, v2, ...).
pub const VERSION_PREFIX: &str = "v";

/// Pre-trained baseline. Never has a history entry.
pub const BASE_VERSION: &str = "v1";

pub const DEFAULT_TOTAL_EPOCHS: u32 = 3;

pub const DEFAULT_SPLIT_SEED: u64 = 42;

/// Training artifacts under these directory prefixes are not needed for inference.
pub const CHECKPOINT_DIR_PREFIX: &str = "checkpoint-";

pub const DEFAULT_HUB_CLI: &str = "huggingface-cli";

/// Rough per-epoch duration used for `estimated_completion`.
///
/// A CPU run of three epochs was observed to take around ten hours.
pub const CPU_EPOCH_ESTIMATE_MINUTES: i64 = 200;
pub const GPU_EPOCH_ESTIMATE_MINUTES: i64 = 20;

/// Fewer rows than this cannot produce non-empty train/val/test splits.
pub const MIN_TRAINING_ROWS: usize = 10;
