//! Telemetry sampler: a long-running `nvidia-smi` (or compatible) process
//! whose stdout is consumed line by line.

use std::io::{BufRead, BufReader};
use std::process::{ChildStdout, Stdio};
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::process::{ManagedChild, Termination};
use crate::remote::{CommandSpec, RemoteHost};
use crate::sample::{Sample, TELEMETRY_QUERY};

/// Where telemetry lines come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelemetrySource {
    /// `nvidia-smi` on this machine.
    Local,
    /// `nvidia-smi` on a remote GPU host over SSH.
    Remote(RemoteHost),
    /// Any command printing `timestamp,power,util,mem_used,mem_total` lines.
    /// The interval is not passed to it.
    Command(CommandSpec),
}

impl TelemetrySource {
    /// Command line that samples every `interval_ms` milliseconds.
    pub fn command(&self, interval_ms: u64) -> CommandSpec {
        match self {
            Self::Local => nvidia_smi_command(interval_ms),
            Self::Remote(host) => nvidia_smi_command(interval_ms).over_ssh(host),
            Self::Command(spec) => spec.clone(),
        }
    }
}

/// `nvidia-smi --query-gpu=... --format=csv,noheader,nounits -lms <interval>`
pub fn nvidia_smi_command(interval_ms: u64) -> CommandSpec {
    CommandSpec::new(
        "nvidia-smi",
        [
            format!("--query-gpu={TELEMETRY_QUERY}"),
            "--format=csv,noheader,nounits".to_string(),
            "-lms".to_string(),
            interval_ms.to_string(),
        ],
    )
}

/// A running sampler process.
pub struct SamplerHandle {
    child: ManagedChild,
    stdout: Option<ChildStdout>,
}

impl SamplerHandle {
    /// Launch the sampler with stdout piped and stderr discarded.
    pub fn start(source: &TelemetrySource, interval_ms: u64) -> Result<Self> {
        let spec = source.command(interval_ms);
        log::info!("starting telemetry sampler: {spec}");
        let mut child = ManagedChild::spawn(&spec, Stdio::piped(), Stdio::null())?;
        let stdout = child.take_stdout();
        Ok(Self { child, stdout })
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Take the output stream. Returns `None` after the first call.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    /// Terminate, wait up to `timeout`, then kill. Always reaps.
    pub fn stop(&mut self, timeout: Duration) -> std::io::Result<Termination> {
        self.child.terminate(timeout)
    }
}

/// Iterator of parsed samples over a line-oriented reader.
///
/// Malformed lines are skipped and counted; the iterator ends at
/// end-of-stream or on a read error.
pub struct SampleStream<R> {
    reader: R,
    started: Instant,
    buf: Vec<u8>,
    discarded: u64,
    read_error: Option<std::io::Error>,
}

impl SampleStream<BufReader<ChildStdout>> {
    pub fn from_stdout(stdout: ChildStdout, started: Instant) -> Self {
        Self::new(BufReader::new(stdout), started)
    }
}

impl<R: BufRead> SampleStream<R> {
    /// `started` is the instant `local_elapsed_seconds` is measured from.
    pub fn new(reader: R, started: Instant) -> Self {
        Self {
            reader,
            started,
            buf: Vec::with_capacity(128),
            discarded: 0,
            read_error: None,
        }
    }

    /// Non-blank lines that failed to parse so far.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// The read error that ended the stream, if any.
    pub fn take_read_error(&mut self) -> Option<std::io::Error> {
        self.read_error.take()
    }
}

impl<R: BufRead> Iterator for SampleStream<R> {
    type Item = Sample;

    fn next(&mut self) -> Option<Sample> {
        loop {
            self.buf.clear();
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.read_error = Some(e);
                    return None;
                }
            }

            let line = String::from_utf8_lossy(&self.buf);
            if line.trim().is_empty() {
                continue;
            }
            let elapsed = self.started.elapsed().as_secs_f64();
            match Sample::parse_line(&line, elapsed) {
                Some(sample) => return Some(sample),
                None => {
                    self.discarded += 1;
                    log::debug!("discarding telemetry line: {:?}", line.trim());
                }
            }
        }
    }
}
