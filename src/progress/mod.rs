// Retrain progress module

mod state;
mod tracker;

pub use state::{epoch_progress, ProgressState, Stage, IDLE_MESSAGE};
pub use tracker::{ProgressTracker, ProgressUpdate};
