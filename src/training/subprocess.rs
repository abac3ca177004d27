// External training program
//
// Contract with the child process (all paths absolute or relative to the
// working directory):
//   RETRAIN_TRAIN_CSV / RETRAIN_VAL_CSV / RETRAIN_TEST_CSV   dataset splits
//   RETRAIN_PARAMS_JSON                                     TrainParams as JSON
//   RETRAIN_OUTPUT_DIR                                      write the model here
//   RETRAIN_RESULTS_JSON                                    optional metrics output
// Lines like `Epoch 2/3` on stdout advance progress. Non-zero exit is a failure.

use anyhow::{Context, Result};
use regex::Regex;
use std::fs;
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use tracing::{debug, info, warn};

use super::{EpochProgress, TrainParams, TrainingBackend, TrainingDataset, TrainingOutput};
use crate::errors::LifecycleError;

/// Trailing stderr kept in failure messages
const STDERR_TAIL_LINES: usize = 20;

pub struct SubprocessTrainer {
    command: Vec<String>,
    working_dir: Option<PathBuf>,
    epoch_line: Regex,
}

impl SubprocessTrainer {
    pub fn new(command: Vec<String>, working_dir: Option<PathBuf>) -> Result<Self> {
        if command.is_empty() {
            anyhow::bail!("Training command is empty");
        }
        Ok(Self {
            command,
            working_dir,
            epoch_line: Regex::new(r"(?i)\bepoch\s+(\d+)\s*/\s*(\d+)")?,
        })
    }

    fn parse_epoch(&self, line: &str) -> Option<EpochProgress> {
        let caps = self.epoch_line.captures(line)?;
        Some(EpochProgress {
            current: caps[1].parse().ok()?,
            total: caps[2].parse().ok()?,
        })
    }

    fn write_params(&self, params: &TrainParams) -> Result<PathBuf> {
        let path = params.work_dir.join("params.json");
        let json = serde_json::json!({
            "total_epochs": params.total_epochs,
            "seed": params.seed,
            "device": params.device,
            "output_dir": params.output_dir,
        });
        fs::write(&path, serde_json::to_vec_pretty(&json)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }
}

impl TrainingBackend for SubprocessTrainer {
    fn name(&self) -> &'static str {
        "subprocess"
    }

    fn train(
        &self,
        dataset: &TrainingDataset,
        params: &TrainParams,
        on_epoch: &mut dyn FnMut(EpochProgress),
    ) -> Result<TrainingOutput> {
        let splits = dataset.write_splits(&params.work_dir.join("splits"))?;
        let params_path = self.write_params(params)?;
        let results_path = params.work_dir.join("results.json");
        if results_path.exists() {
            fs::remove_file(&results_path)
                .with_context(|| format!("Failed to clear {}", results_path.display()))?;
        }
        fs::create_dir_all(&params.output_dir)
            .with_context(|| format!("Failed to create {}", params.output_dir.display()))?;

        let mut cmd = Command::new(&self.command[0]);
        cmd.args(&self.command[1..])
            .env("RETRAIN_TRAIN_CSV", &splits.train)
            .env("RETRAIN_VAL_CSV", &splits.val)
            .env("RETRAIN_TEST_CSV", &splits.test)
            .env("RETRAIN_PARAMS_JSON", &params_path)
            .env("RETRAIN_OUTPUT_DIR", &params.output_dir)
            .env("RETRAIN_RESULTS_JSON", &results_path)
            .env("PYTHONIOENCODING", "utf-8")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        info!(command = ?self.command, "Starting training process with no timeout");
        let mut child = cmd.spawn().map_err(|e| {
            LifecycleError::TrainingFailure(format!("failed to start {}: {}", self.command[0], e))
        })?;

        let stdout = child
            .stdout
            .take()
            .context("Training process stdout was not captured")?;
        let stderr = child
            .stderr
            .take()
            .context("Training process stderr was not captured")?;

        // Drain stderr on its own thread so a chatty child cannot block on a full pipe
        let stderr_reader = std::thread::spawn(move || {
            let mut buf = String::new();
            let _ = BufReader::new(stderr).read_to_string(&mut buf);
            buf
        });

        let mut stdout_buf = String::new();
        for line in BufReader::new(stdout).lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!(error = %e, "Unreadable training output line");
                    continue;
                }
            };
            debug!(target: "hoaxlens::trainer", "{}", line);
            if let Some(epoch) = self.parse_epoch(&line) {
                on_epoch(epoch);
            }
            stdout_buf.push_str(&line);
            stdout_buf.push('\n');
        }

        let stderr_buf = stderr_reader.join().unwrap_or_default();
        let status = child.wait().context("Failed to wait for training process")?;

        if !status.success() {
            let tail: Vec<&str> = stderr_buf.lines().rev().take(STDERR_TAIL_LINES).collect();
            let tail: Vec<&str> = tail.into_iter().rev().collect();
            return Err(LifecycleError::TrainingFailure(format!(
                "training process exited with {}: {}",
                status,
                tail.join("\n")
            ))
            .into());
        }

        let results = match fs::read_to_string(&results_path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(path = %results_path.display(), error = %e, "Ignoring unparseable training results");
                    None
                }
            },
            Err(_) => None,
        };

        info!("Training process finished");
        Ok(TrainingOutput {
            results,
            stdout: stdout_buf,
        })
    }
}
