// Feedback log - append-only CSV store of predictions and user labels

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

use super::record::{Agreement, FeedbackRecord, Label, NewFeedback};
use crate::errors::LifecycleError;
use crate::storage;

/// On-disk row. Field order is the storage schema.
#[derive(Debug, Serialize, Deserialize)]
struct CsvRow {
    id: u64,
    timestamp: i64,
    model_name: String,
    model_version: String,
    text_length: u32,
    prediction: u8,
    prob_hoax: f64,
    confidence: f64,
    user_label: Option<u8>,
    agreement: Agreement,
    raw_text: String,
}

impl From<&FeedbackRecord> for CsvRow {
    fn from(record: &FeedbackRecord) -> Self {
        Self {
            id: record.id,
            timestamp: record.timestamp,
            model_name: record.model_name.clone(),
            model_version: record.model_version.clone(),
            text_length: record.text_length,
            prediction: record.prediction.as_u8(),
            prob_hoax: record.prob_hoax,
            confidence: record.confidence,
            user_label: record.user_label.map(Label::as_u8),
            agreement: record.agreement,
            raw_text: escape_text(&record.raw_text),
        }
    }
}

impl TryFrom<CsvRow> for FeedbackRecord {
    type Error = LifecycleError;

    fn try_from(row: CsvRow) -> Result<Self, Self::Error> {
        let prediction = Label::try_from(row.prediction as i64)?;
        let user_label = row
            .user_label
            .map(|label| Label::try_from(label as i64))
            .transpose()?;

        Ok(Self {
            id: row.id,
            timestamp: row.timestamp,
            model_name: row.model_name,
            model_version: row.model_version,
            text_length: row.text_length,
            prediction,
            prob_hoax: row.prob_hoax,
            confidence: row.confidence,
            user_label,
            agreement: Agreement::between(prediction, user_label),
            raw_text: unescape_text(&row.raw_text),
        })
    }
}

/// Escape newlines so each record stays on one physical line
fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Lazy, finite iterator over the log in id order
pub struct FeedbackIter {
    rows: Option<csv::DeserializeRecordsIntoIter<File, CsvRow>>,
    since_id: Option<u64>,
    remaining: Option<usize>,
    path: PathBuf,
}

impl Iterator for FeedbackIter {
    type Item = FeedbackRecord;

    fn next(&mut self) -> Option<FeedbackRecord> {
        if self.remaining == Some(0) {
            return None;
        }
        let rows = self.rows.as_mut()?;

        loop {
            let row = match rows.next()? {
                Ok(row) => row,
                Err(e) if e.is_io_error() => {
                    warn!(path = %self.path.display(), error = %e, "Feedback log unreadable, stopping");
                    self.rows = None;
                    return None;
                }
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "Skipping malformed feedback row");
                    continue;
                }
            };

            let record = match FeedbackRecord::try_from(row) {
                Ok(record) => record,
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "Skipping invalid feedback row");
                    continue;
                }
            };

            if matches!(self.since_id, Some(since) if record.id <= since) {
                continue;
            }

            if let Some(remaining) = self.remaining.as_mut() {
                *remaining -= 1;
            }
            return Some(record);
        }
    }
}

/// Append-only feedback log backed by a CSV file
pub struct FeedbackLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FeedbackLog {
    /// Open (not create) the log at `path`. A missing file reads as empty.
    pub fn open(path: PathBuf) -> Result<Self> {
        storage::ensure_parent(&path).context("Failed to create feedback directory")?;
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a prediction event and return its assigned id
    pub fn append(&self, entry: NewFeedback) -> Result<u64> {
        entry.validate()?;

        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        let id = self.last_id()? + 1;
        let record = entry.into_record(id);

        let needs_header = std::fs::metadata(&self.path)
            .map(|m| m.len() == 0)
            .unwrap_or(true);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open feedback log: {}", self.path.display()))?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(needs_header)
            .from_writer(file);
        writer
            .serialize(CsvRow::from(&record))
            .context("Failed to write feedback row")?;
        writer.flush().context("Failed to flush feedback log")?;
        writer
            .get_ref()
            .sync_data()
            .context("Failed to sync feedback log")?;

        debug!(id = id, model = %record.model_name, "Appended feedback row");
        Ok(id)
    }

    /// Set the user label for `id`. Returns false when the id is absent.
    pub fn update_label(&self, id: u64, label: Label) -> Result<bool> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        if !self.path.exists() {
            return Ok(false);
        }

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(&self.path)
            .with_context(|| format!("Failed to read feedback log: {}", self.path.display()))?;
        let headers = reader.headers().context("Failed to read feedback header")?.clone();

        let temp_path = storage::temp_path_for(&self.path);
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(&temp_path)
            .with_context(|| format!("Failed to create {}", temp_path.display()))?;
        writer.write_record(&headers)?;

        let mut found = false;
        for result in reader.records() {
            let record = match result {
                Ok(record) => record,
                Err(e) => {
                    warn!(error = %e, "Unreadable feedback line dropped during rewrite");
                    continue;
                }
            };

            let row_id = record.get(0).and_then(|f| f.trim().parse::<u64>().ok());
            if row_id != Some(id) {
                writer.write_record(&record)?;
                continue;
            }

            let row: CsvRow = record
                .deserialize(Some(&headers))
                .with_context(|| format!("Feedback row {} is malformed", id))?;
            let mut updated = FeedbackRecord::try_from(row)?;
            updated.set_user_label(label);
            writer.serialize(CsvRow::from(&updated))?;
            found = true;
        }

        writer.flush().context("Failed to flush rewritten feedback log")?;
        writer.get_ref().sync_all()?;
        drop(writer);

        if !found {
            std::fs::remove_file(&temp_path).ok();
            debug!(id = id, "Label update for unknown feedback row");
            return Ok(false);
        }

        storage::commit_temp(&temp_path, &self.path)?;
        debug!(id = id, label = %label, "Updated feedback label");
        Ok(true)
    }

    /// Iterate records in id order, optionally after `since_id`, at most `limit`
    pub fn iterate(&self, limit: Option<usize>, since_id: Option<u64>) -> Result<FeedbackIter> {
        let rows = match File::open(&self.path) {
            Ok(file) => Some(csv::Reader::from_reader(file).into_deserialize()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to open feedback log: {}", self.path.display())
                })
            }
        };

        Ok(FeedbackIter {
            rows,
            since_id,
            remaining: limit,
            path: self.path.clone(),
        })
    }

    /// Total number of readable records
    pub fn count(&self) -> Result<u32> {
        let count = self.iterate(None, None)?.count();
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    /// Highest id in the log, 0 when empty
    pub fn last_id(&self) -> Result<u64> {
        Ok(self
            .iterate(None, None)?
            .map(|record| record.id)
            .max()
            .unwrap_or(0))
    }

    /// Records carrying a user label, optionally after `since_id`
    pub fn labeled(&self, since_id: Option<u64>) -> Result<impl Iterator<Item = FeedbackRecord>> {
        Ok(self
            .iterate(None, since_id)?
            .filter(|record| record.user_label.is_some()))
    }

    /// Last `n` records, oldest first
    pub fn tail(&self, n: usize) -> Result<Vec<FeedbackRecord>> {
        let mut window = VecDeque::with_capacity(n);
        for record in self.iterate(None, None)? {
            if window.len() == n {
                window.pop_front();
            }
            if n > 0 {
                window.push_back(record);
            }
        }
        Ok(window.into())
    }
}
