// Feedback record types

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::LifecycleError;

/// Binary class label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Fact,
    Hoax,
}

impl Label {
    pub fn as_u8(self) -> u8 {
        match self {
            Label::Fact => 0,
            Label::Hoax => 1,
        }
    }
}

impl TryFrom<i64> for Label {
    type Error = LifecycleError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Label::Fact),
            1 => Ok(Label::Hoax),
            other => Err(LifecycleError::InvalidLabel(other)),
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// Whether the user's label matches the model's prediction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Agreement {
    Yes,
    No,
    Unknown,
}

impl Agreement {
    pub fn between(prediction: Label, user_label: Option<Label>) -> Self {
        match user_label {
            Some(label) if label == prediction => Agreement::Yes,
            Some(_) => Agreement::No,
            None => Agreement::Unknown,
        }
    }
}

/// A single logged prediction, optionally annotated with the true label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    /// Assigned at append time, never reused
    pub id: u64,
    /// Epoch seconds
    pub timestamp: i64,
    pub model_name: String,
    pub model_version: String,
    /// Length of `raw_text` in characters
    pub text_length: u32,
    pub prediction: Label,
    /// Probability of the hoax class
    pub prob_hoax: f64,
    /// Max probability across classes
    pub confidence: f64,
    pub user_label: Option<Label>,
    pub agreement: Agreement,
    pub raw_text: String,
}

impl FeedbackRecord {
    /// Set the ground-truth label and recompute agreement
    pub fn set_user_label(&mut self, label: Label) {
        self.user_label = Some(label);
        self.agreement = Agreement::between(self.prediction, self.user_label);
    }
}

/// A prediction event before it has been assigned an id
#[derive(Debug, Clone)]
pub struct NewFeedback {
    pub model_name: String,
    pub model_version: String,
    pub raw_text: String,
    pub prediction: Label,
    pub prob_hoax: f64,
    pub confidence: f64,
    pub user_label: Option<Label>,
    pub timestamp: i64,
}

impl NewFeedback {
    pub fn new(
        model_name: impl Into<String>,
        model_version: impl Into<String>,
        raw_text: impl Into<String>,
        prediction: Label,
        prob_hoax: f64,
        confidence: f64,
    ) -> Self {
        Self {
            model_name: model_name.into(),
            model_version: model_version.into(),
            raw_text: raw_text.into(),
            prediction,
            prob_hoax,
            confidence,
            user_label: None,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn with_user_label(mut self, label: Label) -> Self {
        self.user_label = Some(label);
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.prob_hoax) {
            bail!("prob_hoax must be within [0, 1], got {}", self.prob_hoax);
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            bail!("confidence must be within [0, 1], got {}", self.confidence);
        }
        Ok(())
    }

    pub(crate) fn into_record(self, id: u64) -> FeedbackRecord {
        let text_length = u32::try_from(self.raw_text.chars().count()).unwrap_or(u32::MAX);
        FeedbackRecord {
            id,
            timestamp: self.timestamp,
            model_name: self.model_name,
            model_version: self.model_version,
            text_length,
            prediction: self.prediction,
            prob_hoax: self.prob_hoax,
            confidence: self.confidence,
            user_label: self.user_label,
            agreement: Agreement::between(self.prediction, self.user_label),
            raw_text: self.raw_text,
        }
    }
}
