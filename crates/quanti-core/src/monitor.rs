//! Energy monitor: sampler, trace writer and aggregator run as one unit.
//!
//! ```text
//!   Idle ──start()──▶ Running ──stop()──▶ Stopped ──stop()──▶ Stopped (same summary)
//! ```
//!
//! While running, a single capture thread reads the sampler's stdout, writes
//! each parsed sample to the trace and folds it into the [`Aggregator`]. The
//! foreground only touches the aggregator, through its mutex. The trace is
//! shared with the foreground so [`EnergyMonitor::stop`] can close it even
//! when the capture thread has to be left behind.
//!
//! # Storage Format
//!
//! Each run is a directory `<output_dir>/<run_name>/` containing:
//! - `energy_trace.csv`: one row per sample
//! - `energy_summary.json`: written only by [`EnergyMonitor::persist_summary`]

use std::io;
use std::path::{Path, PathBuf};
use std::process::ChildStdout;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};

use uuid::Uuid;

use crate::clock::{format_iso8601, now_tag, since_epoch};
use crate::error::{Error, Result};
use crate::sampler::{SampleStream, SamplerHandle, TelemetrySource};
use crate::stats::{Aggregator, RunningStats};
use crate::summary::{Metadata, RunInfo, Summary};
use crate::trace::TraceWriter;

/// Trace file name inside the run directory.
pub const TRACE_FILE: &str = "energy_trace.csv";
/// Summary document name inside the run directory.
pub const SUMMARY_FILE: &str = "energy_summary.json";

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Configuration for one monitoring run.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub interval_ms: u64,
    pub output_dir: PathBuf,
    /// Generated with [`generate_run_name`] when `None`.
    pub run_name: Option<String>,
    pub source: TelemetrySource,
    /// Grace period between terminate and kill.
    pub terminate_timeout: Duration,
    /// Upper bound on waiting for the capture thread, at start and at stop.
    pub capture_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_ms: 200,
            output_dir: PathBuf::from("runs"),
            run_name: None,
            source: TelemetrySource::Local,
            terminate_timeout: Duration::from_secs(5),
            capture_timeout: Duration::from_secs(5),
        }
    }
}

/// `<prefix>_<YYYYMMDDTHHMMSSZ>_<6 hex chars>`
pub fn generate_run_name(prefix: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{prefix}_{}_{}", now_tag(), &suffix[..6])
}

// ---------------------------------------------------------------------------
// Monitor
// ---------------------------------------------------------------------------

/// Lifecycle state of an [`EnergyMonitor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Running,
    Stopped,
}

enum Inner {
    Idle,
    Running(ActiveRun),
    Stopped(Summary),
}

/// Trace writer shared by the capture thread and `stop()`. `None` once closed.
type SharedTrace = Arc<Mutex<Option<TraceWriter>>>;

struct ActiveRun {
    sampler: SamplerHandle,
    stop_flag: Arc<AtomicBool>,
    capture: JoinHandle<CaptureReport>,
    trace: SharedTrace,
    started: Instant,
    started_wall: SystemTime,
}

/// What the capture thread saw before it exited.
#[derive(Debug, Default)]
struct CaptureReport {
    rows: u64,
    discarded: u64,
}

/// Concurrent GPU energy monitor for one run.
///
/// All methods take `&self`; the monitor can be shared (e.g. in an `Arc`)
/// with an interrupt handler that calls [`stop`](Self::stop).
pub struct EnergyMonitor {
    config: MonitorConfig,
    run_name: String,
    run_dir: PathBuf,
    aggregator: Arc<Aggregator>,
    inner: Mutex<Inner>,
}

impl EnergyMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        let run_name = config
            .run_name
            .clone()
            .unwrap_or_else(|| generate_run_name("run"));
        let run_dir = config.output_dir.join(&run_name);
        Self {
            config,
            run_name,
            run_dir,
            aggregator: Arc::new(Aggregator::new()),
            inner: Mutex::new(Inner::Idle),
        }
    }

    pub fn run_name(&self) -> &str {
        &self.run_name
    }

    /// Directory holding this run's artifacts.
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn trace_path(&self) -> PathBuf {
        self.run_dir.join(TRACE_FILE)
    }

    pub fn summary_path(&self) -> PathBuf {
        self.run_dir.join(SUMMARY_FILE)
    }

    pub fn interval_ms(&self) -> u64 {
        self.config.interval_ms
    }

    pub fn state(&self) -> MonitorState {
        match &*self.lock() {
            Inner::Idle => MonitorState::Idle,
            Inner::Running(_) => MonitorState::Running,
            Inner::Stopped(_) => MonitorState::Stopped,
        }
    }

    /// Live aggregate, safe to call while the capture thread is folding.
    pub fn snapshot(&self) -> RunningStats {
        self.aggregator.snapshot()
    }

    /// PID of the sampler process while running.
    pub fn sampler_pid(&self) -> Option<u32> {
        match &*self.lock() {
            Inner::Running(active) => Some(active.sampler.id()),
            _ => None,
        }
    }

    /// Open the trace, launch the sampler and start the capture thread.
    ///
    /// Returns once the capture thread is running; the first sample may not
    /// have arrived yet. Fails with [`Error::AlreadyStarted`] unless idle.
    pub fn start(&self) -> Result<()> {
        let mut inner = self.lock();
        if !matches!(*inner, Inner::Idle) {
            return Err(Error::AlreadyStarted);
        }

        std::fs::create_dir_all(&self.run_dir)?;
        let writer = TraceWriter::open(self.trace_path())?;
        let trace: SharedTrace = Arc::new(Mutex::new(Some(writer)));

        let started_wall = SystemTime::now();
        let started = Instant::now();
        let mut sampler = SamplerHandle::start(&self.config.source, self.config.interval_ms)?;
        let stdout = sampler
            .take_stdout()
            .ok_or_else(|| io::Error::other("sampler stdout not captured"))?;

        let stop_flag = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = mpsc::channel();
        let capture = {
            let aggregator = Arc::clone(&self.aggregator);
            let stop_flag = Arc::clone(&stop_flag);
            let trace = Arc::clone(&trace);
            thread::Builder::new()
                .name(format!("capture-{}", self.run_name))
                .spawn(move || {
                    let _ = ready_tx.send(());
                    capture_loop(stdout, &trace, &aggregator, &stop_flag, started)
                })?
        };

        if ready_rx.recv_timeout(self.config.capture_timeout).is_err() {
            // `sampler` is killed on drop; the thread then sees end-of-stream.
            stop_flag.store(true, Ordering::Release);
            return Err(io::Error::other("capture thread failed to start").into());
        }

        log::info!(
            "energy monitor {} started (sampler pid {}, interval {}ms)",
            self.run_name,
            sampler.id(),
            self.config.interval_ms
        );
        *inner = Inner::Running(ActiveRun {
            sampler,
            stop_flag,
            capture,
            trace,
            started,
            started_wall,
        });
        Ok(())
    }

    /// Stop capture and compute the run summary.
    ///
    /// Terminates the sampler (graceful, then forced after the configured
    /// timeout), waits a bounded time for the capture thread to close the
    /// trace, and merges `metadata` over the computed fields. Idempotent: once
    /// stopped, later calls return the first summary and ignore `metadata`.
    /// Stopping an idle monitor yields an empty summary.
    ///
    /// Never writes the summary document; see [`persist_summary`](Self::persist_summary).
    pub fn stop(&self, metadata: Metadata) -> Result<Summary> {
        let mut inner = self.lock();
        let active = match std::mem::replace(&mut *inner, Inner::Idle) {
            Inner::Stopped(summary) => {
                *inner = Inner::Stopped(summary.clone());
                return Ok(summary);
            }
            Inner::Idle => None,
            Inner::Running(active) => Some(active),
        };

        let (started_wall, duration) = match active {
            Some(active) => (active.started_wall, self.teardown(active)),
            None => (SystemTime::now(), Duration::ZERO),
        };
        let ended_wall = SystemTime::now();

        let run = RunInfo {
            run_name: self.run_name.clone(),
            started_at: format_iso8601(since_epoch(started_wall)),
            ended_at: format_iso8601(since_epoch(ended_wall)),
            interval_ms: self.config.interval_ms,
            duration,
            trace_csv_path: self.trace_path(),
        };
        let mut summary = Summary::compute(run, &self.aggregator.snapshot());
        summary.merge_metadata(metadata);

        log::info!(
            "energy monitor {} stopped: {} samples over {:.2}s, avg {:.2}W, {:.4}Wh",
            self.run_name,
            summary.samples,
            summary.duration_s,
            summary.avg_power_w,
            summary.energy_wh
        );
        *inner = Inner::Stopped(summary.clone());
        Ok(summary)
    }

    /// Write `summary` to [`summary_path`](Self::summary_path).
    pub fn persist_summary(&self, summary: &Summary) -> Result<PathBuf> {
        let path = self.summary_path();
        std::fs::create_dir_all(&self.run_dir)?;
        summary.persist(&path)?;
        Ok(path)
    }

    /// Release the sampler and capture thread; returns the run duration.
    fn teardown(&self, mut active: ActiveRun) -> Duration {
        active.stop_flag.store(true, Ordering::Release);

        match active.sampler.stop(self.config.terminate_timeout) {
            Ok(outcome) => log::debug!("sampler stopped: {outcome:?}"),
            Err(e) => log::warn!("failed to stop sampler cleanly: {e}"),
        }
        let duration = Instant::now().saturating_duration_since(active.started);

        let deadline = Instant::now() + self.config.capture_timeout;
        while !active.capture.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        if active.capture.is_finished() {
            match active.capture.join() {
                Ok(report) => log::debug!(
                    "capture thread exited: {} rows, {} discarded lines",
                    report.rows,
                    report.discarded
                ),
                Err(_) => log::error!("capture thread panicked"),
            }
        } else {
            log::warn!(
                "capture thread still running after {:.1}s, detaching",
                self.config.capture_timeout.as_secs_f64()
            );
            if let Some(rows) = close_trace(&active.trace) {
                log::debug!("trace closed with {rows} rows");
            }
        }
        duration
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for EnergyMonitor {
    fn drop(&mut self) {
        if self.state() == MonitorState::Running {
            let _ = self.stop(Metadata::new());
        }
    }
}

fn lock_trace(trace: &Mutex<Option<TraceWriter>>) -> MutexGuard<'_, Option<TraceWriter>> {
    trace.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Take the writer out of `trace` and close it. `None` if already closed.
fn close_trace(trace: &Mutex<Option<TraceWriter>>) -> Option<u64> {
    let writer = lock_trace(trace).take()?;
    let path = writer.path().to_path_buf();
    match writer.close() {
        Ok(rows) => Some(rows),
        Err(e) => {
            log::error!("closing {} failed: {e}", path.display());
            Some(0)
        }
    }
}

/// Body of the capture thread.
fn capture_loop(
    stdout: ChildStdout,
    trace: &Mutex<Option<TraceWriter>>,
    aggregator: &Aggregator,
    stop_flag: &AtomicBool,
    started: Instant,
) -> CaptureReport {
    let mut stream = SampleStream::from_stdout(stdout, started);

    for sample in stream.by_ref() {
        if stop_flag.load(Ordering::Acquire) {
            break;
        }
        {
            let mut guard = lock_trace(trace);
            if let Some(writer) = guard.as_mut() {
                if let Err(e) = writer.write(&sample) {
                    log::error!("writing {} failed, trace truncated: {e}", writer.path().display());
                    *guard = None;
                }
            }
        }
        aggregator.fold(&sample);
    }

    if !stop_flag.load(Ordering::Acquire) {
        match stream.take_read_error() {
            Some(e) => log::warn!("telemetry stream read failed: {e}"),
            None => log::warn!(
                "telemetry sampler exited early after {} samples",
                aggregator.snapshot().count
            ),
        }
    }

    CaptureReport {
        rows: close_trace(trace).unwrap_or_default(),
        discarded: stream.discarded(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
