pub mod bench;
pub mod models;
pub mod monitor;
pub mod runs;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use quanti_core::{CommandSpec, RemoteHost, TelemetrySource};

/// Target selection shared by `bench` and `monitor`.
pub struct Target {
    pub ssh_host: Option<String>,
    pub local: bool,
    pub sampler_cmd: Option<String>,
}

impl Target {
    /// `--ssh-host`, else the SSH_* environment unless `--local`.
    pub fn remote(&self) -> Option<RemoteHost> {
        if self.local {
            return None;
        }
        match &self.ssh_host {
            Some(host) => Some(RemoteHost::new(host.clone())),
            None => RemoteHost::from_env(),
        }
    }

    pub fn telemetry_source(&self) -> TelemetrySource {
        if let Some(cmd) = &self.sampler_cmd {
            return TelemetrySource::Command(CommandSpec::shell(cmd.clone()));
        }
        match self.remote() {
            Some(host) => TelemetrySource::Remote(host),
            None => TelemetrySource::Local,
        }
    }
}

/// Install a SIGINT/SIGTERM/SIGHUP handler that sets the returned flag.
pub fn interrupt_flag() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    install_interrupt(Arc::clone(&flag));
    flag
}

/// Route SIGINT, SIGTERM and SIGHUP into `flag` so every way of ending the
/// process goes through the same cleanup.
pub fn install_interrupt(flag: Arc<AtomicBool>) {
    let result = ctrlc::set_handler(move || {
        if !flag.swap(true, Ordering::SeqCst) {
            eprintln!("\nInterrupted, cleaning up...");
        }
    });
    if let Err(e) = result {
        eprintln!("Error setting signal handler: {e}");
        std::process::exit(1);
    }
}

/// Parse "500ms", "90s", "5m", "1h" or plain seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    const UNITS: [(&str, u64); 4] = [("ms", 1), ("s", 1_000), ("m", 60_000), ("h", 3_600_000)];

    let s = s.trim();
    let (digits, millis_per_unit) = UNITS
        .iter()
        .find_map(|&(suffix, ms)| s.strip_suffix(suffix).map(|rest| (rest, ms)))
        .unwrap_or((s, 1_000));

    let value: u64 = digits.trim().parse().ok()?;
    value.checked_mul(millis_per_unit).map(Duration::from_millis)
}

pub fn format_duration_s(secs: f64) -> String {
    if secs < 60.0 {
        format!("{secs:.1}s")
    } else if secs < 3600.0 {
        format!("{:.1}m", secs / 60.0)
    } else {
        format!("{:.1}h", secs / 3600.0)
    }
}

pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{head}...")
    }
}

/// Print `err` and exit non-zero.
pub fn fail(context: &str, err: impl std::fmt::Display) -> ! {
    eprintln!("Error: {context}: {err}");
    std::process::exit(1);
}
