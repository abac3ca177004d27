// Training dataset assembly
//
// Base corpus plus user-labeled feedback, shuffled with a fixed seed and
// split 80/10/10 into train/val/test.

use anyhow::{Context, Result};
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::constants::MIN_TRAINING_ROWS;
use crate::errors::LifecycleError;
use crate::feedback::{FeedbackLog, Label};

#[derive(Debug, Clone, PartialEq)]
pub struct LabeledText {
    pub text: String,
    pub label: Label,
}

/// On-disk row shared by the corpus file and the split files
#[derive(Debug, Serialize, Deserialize)]
struct TextRow {
    text: String,
    label: i64,
}

#[derive(Debug, Clone)]
pub struct TrainingDataset {
    pub train: Vec<LabeledText>,
    pub val: Vec<LabeledText>,
    pub test: Vec<LabeledText>,
    /// Rows taken from the base corpus
    pub corpus_rows: usize,
    /// Rows taken from labeled feedback
    pub feedback_rows: usize,
    /// Feedback log size at assembly time, labeled or not
    pub feedback_seen: u32,
}

/// Split files written for an external trainer
#[derive(Debug, Clone)]
pub struct SplitPaths {
    pub train: PathBuf,
    pub val: PathBuf,
    pub test: PathBuf,
}

impl TrainingDataset {
    /// Combine the base corpus with every labeled feedback record
    pub fn assemble(corpus_path: &Path, feedback: &FeedbackLog, seed: u64) -> Result<Self> {
        let mut rows = load_corpus(corpus_path)?;
        let corpus_rows = rows.len();

        let mut feedback_seen: u32 = 0;
        let mut feedback_rows = 0;
        for record in feedback.iterate(None, None)? {
            feedback_seen += 1;
            if let Some(label) = record.user_label {
                rows.push(LabeledText {
                    text: record.raw_text,
                    label,
                });
                feedback_rows += 1;
            }
        }

        info!(corpus_rows, feedback_rows, feedback_seen, "Assembled training rows");

        let mut dataset = Self::split(rows, seed)?;
        dataset.corpus_rows = corpus_rows;
        dataset.feedback_rows = feedback_rows;
        dataset.feedback_seen = feedback_seen;
        Ok(dataset)
    }

    /// Seeded shuffle followed by an 80/10/10 split
    pub fn split(mut rows: Vec<LabeledText>, seed: u64) -> Result<Self> {
        if rows.len() < MIN_TRAINING_ROWS {
            return Err(LifecycleError::TrainingFailure(format!(
                "dataset has {} rows, at least {} are required",
                rows.len(),
                MIN_TRAINING_ROWS
            ))
            .into());
        }

        let mut rng = SmallRng::seed_from_u64(seed);
        rows.shuffle(&mut rng);

        let holdout = rows.len() / 10;
        let test = rows.split_off(rows.len() - holdout);
        let val = rows.split_off(rows.len() - holdout);

        Ok(Self {
            corpus_rows: 0,
            feedback_rows: 0,
            feedback_seen: 0,
            train: rows,
            val,
            test,
        })
    }

    pub fn len(&self) -> usize {
        self.train.len() + self.val.len() + self.test.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write `train.csv`, `val.csv` and `test.csv` (`text,label`) into `dir`
    pub fn write_splits(&self, dir: &Path) -> Result<SplitPaths> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        let paths = SplitPaths {
            train: dir.join("train.csv"),
            val: dir.join("val.csv"),
            test: dir.join("test.csv"),
        };
        write_rows(&paths.train, &self.train)?;
        write_rows(&paths.val, &self.val)?;
        write_rows(&paths.test, &self.test)?;

        debug!(dir = %dir.display(), train = self.train.len(), val = self.val.len(), test = self.test.len(), "Wrote dataset splits");
        Ok(paths)
    }
}

/// Read the base corpus. A missing file is an empty corpus.
pub fn load_corpus(path: &Path) -> Result<Vec<LabeledText>> {
    if !path.exists() {
        warn!(path = %path.display(), "Base corpus not found, training on feedback only");
        return Ok(Vec::new());
    }

    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open corpus {}", path.display()))?;

    let mut rows = Vec::new();
    for (index, row) in reader.deserialize::<TextRow>().enumerate() {
        let parsed = row
            .map_err(anyhow::Error::from)
            .and_then(|row| Ok((row.text, Label::try_from(row.label)?)));
        match parsed {
            Ok((text, label)) => rows.push(LabeledText { text, label }),
            Err(e) => warn!(path = %path.display(), row = index + 1, error = %e, "Skipping corpus row"),
        }
    }
    Ok(rows)
}

fn write_rows(path: &Path, rows: &[LabeledText]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for row in rows {
        writer.serialize(TextRow {
            text: row.text.clone(),
            label: i64::from(row.label.as_u8()),
        })?;
    }
    writer
        .flush()
        .with_context(|| format!("Failed to flush {}", path.display()))
}
