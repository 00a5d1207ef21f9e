//! Prompt workloads: loading, per-prompt results, and the request loop.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::error::{Error, Result};
use crate::inference::CompletionBackend;
use crate::summary::Metadata;

/// Column holding the prompt text in workload CSV files.
pub const PROMPT_COLUMN: &str = "text";

/// Prefix written in place of a reply when a request fails.
pub const ERROR_PREFIX: &str = "__ERROR__";

/// Header of the per-prompt results file.
pub const RESULTS_HEADER: [&str; 3] = ["idx", "prompt", "reply"];

const PROGRESS_EVERY: usize = 10;

/// Prompts read from a workload file.
#[derive(Debug, Clone)]
pub struct Workload {
    pub path: PathBuf,
    pub prompts: Vec<String>,
    /// File size in bytes.
    pub size_bytes: u64,
}

impl Workload {
    /// Read the `text` column of a CSV file with a header row.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::WorkloadNotFound(path.to_path_buf()));
        }
        let size_bytes = fs::metadata(path)?.len();

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(path)?;
        let column = reader
            .headers()?
            .iter()
            .position(|h| h.trim() == PROMPT_COLUMN)
            .ok_or_else(|| {
                Error::Workload(format!(
                    "{} has no '{PROMPT_COLUMN}' column",
                    path.display()
                ))
            })?;

        let mut prompts = Vec::new();
        for record in reader.records() {
            let record = record?;
            prompts.push(record.get(column).unwrap_or_default().to_string());
        }

        Ok(Self {
            path: path.to_path_buf(),
            prompts,
            size_bytes,
        })
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }
}

/// Append-mode writer for `idx,prompt,reply` rows.
pub struct ResultsWriter {
    path: PathBuf,
    writer: csv::Writer<File>,
}

impl ResultsWriter {
    /// Open `path` for appending, writing the header only when the file is
    /// new or empty. Parent directories are created.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let is_empty = file.metadata()?.len() == 0;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if is_empty {
            writer.write_record(RESULTS_HEADER)?;
            writer.flush()?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            writer,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one row and flush it.
    pub fn append(&mut self, idx: usize, prompt: &str, reply: &str) -> Result<()> {
        self.writer
            .write_record([idx.to_string().as_str(), prompt, reply])?;
        self.writer.flush()?;
        Ok(())
    }
}

/// What a finished workload contributes to the run summary.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadResult {
    pub results_file: PathBuf,
    pub duration: Duration,
    pub n_prompts: usize,
    pub n_failed: usize,
    pub workload_size: u64,
}

impl WorkloadResult {
    pub fn to_metadata(&self) -> Metadata {
        let mut meta = Metadata::new();
        meta.insert(
            "results_file".into(),
            Value::from(self.results_file.display().to_string()),
        );
        meta.insert(
            "workload_duration_s".into(),
            Value::from(self.duration.as_secs_f64()),
        );
        meta.insert("n_prompts".into(), Value::from(self.n_prompts));
        meta.insert("n_failed".into(), Value::from(self.n_failed));
        meta.insert("workload_size".into(), Value::from(self.workload_size));
        meta
    }
}

/// Send every prompt in order, one request at a time.
///
/// Rows are numbered from 1 in workload order. A failed request is recorded
/// as `__ERROR__: <message>` and the loop moves on. Setting `cancel` stops
/// the loop before the next prompt with [`Error::Interrupted`]; rows already
/// written stay on disk.
pub fn run_workload(
    backend: &dyn CompletionBackend,
    workload: &Workload,
    results: &mut ResultsWriter,
    cancel: &AtomicBool,
) -> Result<WorkloadResult> {
    let total = workload.len();
    let started = Instant::now();
    let mut n_failed = 0;

    log::info!("running {total} prompts from {}", workload.path.display());
    for (idx, prompt) in (1..).zip(&workload.prompts) {
        if cancel.load(Ordering::SeqCst) {
            log::warn!("workload interrupted after {}/{total} prompts", idx - 1);
            return Err(Error::Interrupted);
        }

        let reply = match backend.complete(prompt) {
            Ok(reply) => reply,
            Err(e) => {
                n_failed += 1;
                log::warn!("prompt {idx} failed: {e}");
                format!("{ERROR_PREFIX}: {e}")
            }
        };
        results.append(idx, prompt, &reply)?;

        if idx % PROGRESS_EVERY == 0 {
            log::info!("processed {idx}/{total} prompts");
        }
    }

    let duration = started.elapsed();
    log::info!(
        "workload finished: {total} prompts in {:.1}s ({n_failed} failed)",
        duration.as_secs_f64()
    );

    Ok(WorkloadResult {
        results_file: results.path().to_path_buf(),
        duration,
        n_prompts: total,
        n_failed,
        workload_size: workload.size_bytes,
    })
}
