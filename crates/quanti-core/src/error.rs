//! Error type shared by every quanti component.

use std::path::PathBuf;
use std::time::Duration;

/// Result alias used throughout `quanti-core`.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures that can abort a monitor or a benchmark run.
///
/// Per-line telemetry parse failures and per-prompt request failures are not
/// represented here: they are absorbed where they happen.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("energy monitor already started")]
    AlreadyStarted,

    #[error("unknown model alias '{0}'")]
    UnknownModel(String),

    #[error("workload file not found: {}", .0.display())]
    WorkloadNotFound(PathBuf),

    #[error("invalid workload: {0}")]
    Workload(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected response from inference server: {0}")]
    InvalidResponse(String),

    #[error("inference server exited during startup ({0})")]
    ServerExited(String),

    #[error("inference server not ready after {}s", .0.as_secs())]
    ReadinessTimeout(Duration),

    #[error("benchmark interrupted")]
    Interrupted,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_timeout_reports_seconds() {
        let err = Error::ReadinessTimeout(Duration::from_secs(300));
        assert_eq!(err.to_string(), "inference server not ready after 300s");
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
