// Retrain module
// Decision rule, version archive and the orchestrator tying them to training

mod archive;
pub mod decision;
mod orchestrator;
mod outcome;

pub use archive::ModelArchive;
pub use decision::{should_retrain, RetrainDecision};
pub use orchestrator::RetrainOrchestrator;
pub use outcome::{RetrainOutcome, TriggerOutcome};
