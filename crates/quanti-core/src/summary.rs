//! The energy summary of one monitoring run.
//!
//! A [`Summary`] has a fixed set of computed fields plus an open metadata map
//! supplied by the caller (workload, model, result-file locations). In the
//! JSON document the metadata is merged last, so a metadata key replaces a
//! computed field of the same name.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::stats::RunningStats;

/// Caller-supplied key/value pairs merged into a summary.
pub type Metadata = Map<String, Value>;

/// Final report of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub run_name: String,
    pub started_at: String,
    pub ended_at: String,
    pub interval_ms: u64,
    pub duration_s: f64,
    pub samples: u64,
    #[serde(rename = "avg_power_W")]
    pub avg_power_w: f64,
    #[serde(rename = "max_power_W")]
    pub max_power_w: f64,
    pub avg_util_pct: f64,
    pub max_util_pct: f64,
    #[serde(rename = "avg_mem_MiB")]
    pub avg_mem_mib: f64,
    #[serde(rename = "max_mem_MiB")]
    pub max_mem_mib: f64,
    #[serde(rename = "energy_Wh")]
    pub energy_wh: f64,
    pub trace_csv_path: PathBuf,
    #[serde(skip)]
    pub metadata: Metadata,
}

/// Identity and timing of a sealed run, as seen by [`Summary::compute`].
#[derive(Debug, Clone)]
pub struct RunInfo {
    pub run_name: String,
    pub started_at: String,
    pub ended_at: String,
    pub interval_ms: u64,
    pub duration: Duration,
    pub trace_csv_path: PathBuf,
}

/// Energy in watt-hours for `avg_power_w` sustained over `duration`.
pub fn energy_wh(avg_power_w: f64, duration: Duration) -> f64 {
    avg_power_w * duration.as_secs_f64() / 3600.0
}

impl Summary {
    /// Derive averages and energy from the final aggregate.
    ///
    /// Energy is average power times wall-clock duration. With no samples
    /// every average, and therefore the energy, is 0.
    pub fn compute(run: RunInfo, stats: &RunningStats) -> Self {
        let avg_power_w = stats.avg_power();
        Self {
            run_name: run.run_name,
            started_at: run.started_at,
            ended_at: run.ended_at,
            interval_ms: run.interval_ms,
            duration_s: run.duration.as_secs_f64(),
            samples: stats.count,
            avg_power_w,
            max_power_w: stats.max_power,
            avg_util_pct: stats.avg_util(),
            max_util_pct: stats.max_util,
            avg_mem_mib: stats.avg_mem(),
            max_mem_mib: stats.max_mem,
            energy_wh: energy_wh(avg_power_w, run.duration),
            trace_csv_path: run.trace_csv_path,
            metadata: Metadata::new(),
        }
    }

    /// Merge `metadata` into this summary. Later keys win.
    pub fn merge_metadata(&mut self, metadata: Metadata) {
        self.metadata.extend(metadata);
    }

    /// Insert one metadata entry.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.metadata.insert(key.into(), value.into());
    }

    /// The JSON document: computed fields overlaid with metadata.
    ///
    /// Fails with [`Error::Json`] when a field cannot be represented, such as
    /// a trace path that is not valid UTF-8.
    pub fn to_document(&self) -> Result<Map<String, Value>> {
        let mut doc = match serde_json::to_value(self)? {
            Value::Object(map) => map,
            other => {
                return Err(Error::Json(serde::ser::Error::custom(format!(
                    "summary serialized to {other} instead of an object"
                ))));
            }
        };
        for (k, v) in &self.metadata {
            doc.insert(k.clone(), v.clone());
        }
        Ok(doc)
    }

    /// Field lookup on the merged document.
    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.to_document()?.remove(key))
    }

    /// Write the merged document as pretty JSON to `path`. Nothing is
    /// written when the document cannot be built.
    pub fn persist(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&Value::Object(self.to_document()?))?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Read a persisted summary document back as a JSON object.
pub fn read_document(path: &Path) -> Result<Map<String, Value>> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}
