// Hoaxlens - feedback-driven model lifecycle for the hoax news classifier
// Library exports

pub mod cli;
pub mod config;
pub mod errors;
pub mod feedback;
pub mod progress;
pub mod publish;
pub mod registry;
pub mod retrain;
pub mod storage;
pub mod training;

pub use errors::LifecycleError;
