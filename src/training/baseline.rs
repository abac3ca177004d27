// Majority-class baseline trainer
// Runs in-process with no ML runtime. Hoax is the positive class.

use anyhow::{Context, Result};
use serde_json::json;
use std::fs;
use tracing::info;

use super::{EpochProgress, LabeledText, TrainParams, TrainingBackend, TrainingDataset, TrainingOutput};
use crate::feedback::Label;

pub const BASELINE_ARTIFACT: &str = "baseline.json";

pub struct BaselineTrainer;

fn majority(rows: &[LabeledText]) -> Label {
    let hoax = rows.iter().filter(|r| r.label == Label::Hoax).count();
    if hoax * 2 > rows.len() {
        Label::Hoax
    } else {
        Label::Fact
    }
}

/// Accuracy, precision, recall and f1 (as fractions) of predicting `predicted` for every row
fn score(rows: &[LabeledText], predicted: Label) -> [f64; 4] {
    let total = rows.len() as f64;
    let hoax = rows.iter().filter(|r| r.label == Label::Hoax).count() as f64;
    let correct = rows.iter().filter(|r| r.label == predicted).count() as f64;

    let accuracy = if total > 0.0 { correct / total } else { 0.0 };
    let (precision, recall) = match predicted {
        Label::Hoax if total > 0.0 => (hoax / total, if hoax > 0.0 { 1.0 } else { 0.0 }),
        _ => (0.0, 0.0),
    };
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };
    [accuracy, precision, recall, f1]
}

impl TrainingBackend for BaselineTrainer {
    fn name(&self) -> &'static str {
        "baseline"
    }

    fn train(
        &self,
        dataset: &TrainingDataset,
        params: &TrainParams,
        on_epoch: &mut dyn FnMut(EpochProgress),
    ) -> Result<TrainingOutput> {
        let label = majority(&dataset.train);
        for current in 1..=params.total_epochs {
            on_epoch(EpochProgress {
                current,
                total: params.total_epochs,
            });
        }

        fs::create_dir_all(&params.output_dir)
            .with_context(|| format!("Failed to create {}", params.output_dir.display()))?;
        let artifact = params.output_dir.join(BASELINE_ARTIFACT);
        let model = json!({
            "kind": "majority-class",
            "label": label.as_u8(),
            "train_rows": dataset.train.len(),
        });
        fs::write(&artifact, serde_json::to_vec_pretty(&model)?)
            .with_context(|| format!("Failed to write {}", artifact.display()))?;

        let [accuracy, precision, recall, f1] = score(&dataset.test, label);
        info!(label = %label, accuracy, "Baseline model trained");

        Ok(TrainingOutput {
            results: Some(json!({
                "test": {
                    "eval_accuracy": accuracy,
                    "eval_precision": precision,
                    "eval_recall": recall,
                    "eval_f1": f1,
                }
            })),
            stdout: format!("majority label {} over {} rows\n", label, dataset.train.len()),
        })
    }
}
