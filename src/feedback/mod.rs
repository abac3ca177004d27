// Feedback module
// Prediction events and the user corrections that drive retraining

mod log;
mod record;

pub use log::{FeedbackIter, FeedbackLog};
pub use record::{Agreement, FeedbackRecord, Label, NewFeedback};
