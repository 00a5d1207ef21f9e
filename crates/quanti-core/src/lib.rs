//! # quanti-core
//!
//! **Measure what an LLM workload costs in joules.**
//!
//! `quanti-core` samples GPU power, utilization and memory while a workload
//! runs against an OpenAI-compatible inference server (vLLM), persists the
//! raw trace, and reduces it to an energy summary.
//!
//! ## Quick Start
//!
//! ```no_run
//! use quanti_core::{EnergyMonitor, Metadata, MonitorConfig};
//!
//! let monitor = EnergyMonitor::new(MonitorConfig::default());
//! monitor.start()?;
//! // ... run the workload ...
//! let summary = monitor.stop(Metadata::new())?;
//! monitor.persist_summary(&summary)?;
//! println!("{:.4} Wh", summary.energy_wh);
//! # Ok::<(), quanti_core::Error>(())
//! ```
//!
//! ## Architecture
//!
//! Sampler (nvidia-smi) → capture thread → Trace CSV + Aggregator → Summary
//!
//! The [`EnergyMonitor`] owns the sampler process and one capture thread. The
//! [`Benchmark`] orchestrator wraps it with an inference [`Environment`]
//! (launch `vllm serve`, wait for `/health`) and a prompt workload, and
//! guarantees both are released on every exit path.

pub mod benchmark;
pub mod clock;
pub mod error;
pub mod inference;
pub mod monitor;
pub mod process;
pub mod remote;
pub mod sample;
pub mod sampler;
pub mod server;
pub mod stats;
pub mod summary;
pub mod trace;
pub mod workload;

#[cfg(test)]
#[path = "../tests/common/mod.rs"]
mod testing;

pub use benchmark::{
    Benchmark, BenchmarkConfig, BenchmarkOutcome, Environment, completion_report,
};
pub use error::{Error, Result};
pub use inference::{CompletionBackend, CompletionSettings, InferenceClient};
pub use monitor::{EnergyMonitor, MonitorConfig, MonitorState, generate_run_name};
pub use remote::{CommandSpec, RemoteHost};
pub use sample::Sample;
pub use sampler::TelemetrySource;
pub use server::{ExternalServer, MODELS, ManagedServer, ServerConfig, resolve_model};
pub use stats::{Aggregator, RunningStats};
pub use summary::{Metadata, Summary};
pub use trace::TraceWriter;
pub use workload::{Workload, WorkloadResult};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
