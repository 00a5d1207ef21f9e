//! Append-only CSV trace of telemetry samples.
//!
//! # Format
//!
//! ```text
//! t_local_s,timestamp,power_W,util_pct,mem_used_MiB,mem_total_MiB
//! 0.103,2026/02/15 01:30:00.123,100.00,50.00,1000.00,8000.00
//! ```
//!
//! Rows are flushed as they are written so a crashed run still leaves a
//! readable trace behind.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::sample::Sample;

/// Header row of every trace file.
pub const TRACE_HEADER: &str = "t_local_s,timestamp,power_W,util_pct,mem_used_MiB,mem_total_MiB";

/// Incremental writer for one trace file.
pub struct TraceWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    rows: u64,
}

impl TraceWriter {
    /// Create (truncate) the trace file and write the header.
    pub fn open(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let mut writer = BufWriter::new(File::create(&path)?);
        writeln!(writer, "{TRACE_HEADER}")?;
        writer.flush()?;
        Ok(Self {
            path,
            writer,
            rows: 0,
        })
    }

    /// Append one row.
    pub fn write(&mut self, sample: &Sample) -> std::io::Result<()> {
        writeln!(
            self.writer,
            "{:.3},{},{:.2},{:.2},{:.2},{:.2}",
            sample.local_elapsed_seconds,
            csv_field(&sample.device_timestamp),
            sample.power_watts,
            sample.utilization_pct,
            sample.memory_used_mib,
            sample.memory_total_mib,
        )?;
        self.writer.flush()?;
        self.rows += 1;
        Ok(())
    }

    /// Flush and close the file, returning the number of rows written.
    pub fn close(mut self) -> std::io::Result<u64> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(self.rows)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Data rows written so far (header excluded).
    pub fn rows(&self) -> u64 {
        self.rows
    }
}

/// Device timestamps never contain commas in practice, but a quoted field
/// keeps the row count honest if one ever does.
fn csv_field(s: &str) -> std::borrow::Cow<'_, str> {
    if s.contains([',', '"', '\n']) {
        format!("\"{}\"", s.replace('"', "\"\"")).into()
    } else {
        s.into()
    }
}
