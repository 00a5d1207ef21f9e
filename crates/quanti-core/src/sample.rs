//! Parsed GPU telemetry readings.

use serde::{Deserialize, Serialize};

/// Column order requested from the telemetry tool.
pub const TELEMETRY_QUERY: &str = "timestamp,power.draw,utilization.gpu,memory.used,memory.total";

/// One telemetry reading. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Seconds since the monitor started, measured on the local clock.
    pub local_elapsed_seconds: f64,
    /// Timestamp string as printed by the device tool.
    pub device_timestamp: String,
    pub power_watts: f64,
    pub utilization_pct: f64,
    pub memory_used_mib: f64,
    pub memory_total_mib: f64,
}

impl Sample {
    /// Parse one output line of the telemetry tool.
    ///
    /// Returns `None` for blank lines, lines with fewer than five fields, or
    /// any numeric field that does not parse. Extra trailing fields are
    /// ignored.
    pub fn parse_line(line: &str, local_elapsed_seconds: f64) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let parts: Vec<&str> = line.split(',').map(str::trim).collect();
        if parts.len() < 5 {
            return None;
        }

        Some(Self {
            local_elapsed_seconds,
            device_timestamp: parts[0].to_string(),
            power_watts: parse_metric(parts[1])?,
            utilization_pct: parse_metric(parts[2])?,
            memory_used_mib: parse_metric(parts[3])?,
            memory_total_mib: parse_metric(parts[4])?,
        })
    }
}

/// `nvidia-smi` prints `[N/A]` or `[Not Supported]` for unavailable metrics;
/// those, like NaN and infinities, fail the parse.
fn parse_metric(field: &str) -> Option<f64> {
    field.parse::<f64>().ok().filter(|v| v.is_finite())
}
