// Model registry module
// Which version is current, and the history of retrains that produced it

mod state;
mod store;

pub use state::{format_version, parse_version, Metrics, RegistryState, RetrainEntry};
pub use store::ModelRegistry;
