//! Benchmark orchestration: bring up the inference environment, measure a
//! workload under the energy monitor, and report.
//!
//! Whatever happens after the environment is prepared, the monitor is
//! stopped and the environment torn down before `run` returns.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::inference::CompletionBackend;
use crate::monitor::{EnergyMonitor, MonitorConfig, MonitorState};
use crate::server::resolve_model;
use crate::summary::{Metadata, Summary};
use crate::workload::{ResultsWriter, Workload, WorkloadResult, run_workload};

/// Benchmark report name inside the run directory.
pub const REPORT_FILE: &str = "summary.json";
/// Per-prompt results, relative to the run directory.
pub const RESULTS_FILE: &str = "detailed/query_responses.csv";

/// The serving side of a benchmark: whatever must be up before prompts can
/// be sent, and torn down afterwards.
pub trait Environment {
    /// Bring the environment up. Must observe `cancel` while waiting.
    fn prepare(&mut self, cancel: &AtomicBool) -> Result<()>;
    /// Release everything `prepare` acquired. Safe to call after a failed
    /// or partial `prepare`, and more than once.
    fn teardown(&mut self);
}

#[derive(Debug, Clone)]
pub struct BenchmarkConfig {
    /// Model alias, see [`crate::server::MODELS`].
    pub llm: String,
    /// CSV file with a `text` column.
    pub workload: PathBuf,
    pub monitor: MonitorConfig,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            llm: "Llama-3-8B".to_string(),
            workload: PathBuf::from("workloads/prompts.csv"),
            monitor: MonitorConfig::default(),
        }
    }
}

/// Everything a completed benchmark produced.
#[derive(Debug, Clone)]
pub struct BenchmarkOutcome {
    pub llm: String,
    pub workload_path: PathBuf,
    pub summary: Summary,
    pub workload: WorkloadResult,
    pub energy_summary_path: PathBuf,
    pub report_path: PathBuf,
}

/// One validated benchmark, ready to run.
pub struct Benchmark {
    config: BenchmarkConfig,
    model_repo: &'static str,
    workload: Workload,
    monitor: Arc<EnergyMonitor>,
    cancel: Arc<AtomicBool>,
}

impl Benchmark {
    /// Resolve the model alias and load the workload. Nothing is launched.
    pub fn new(config: BenchmarkConfig) -> Result<Self> {
        let model_repo =
            resolve_model(&config.llm).ok_or_else(|| Error::UnknownModel(config.llm.clone()))?;
        let workload = Workload::load(&config.workload)?;
        if workload.is_empty() {
            log::warn!("workload {} has no prompts", config.workload.display());
        }
        let monitor = Arc::new(EnergyMonitor::new(config.monitor.clone()));

        Ok(Self {
            config,
            model_repo,
            workload,
            monitor,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Hugging Face repo the alias resolved to.
    pub fn model_repo(&self) -> &'static str {
        self.model_repo
    }

    pub fn workload(&self) -> &Workload {
        &self.workload
    }

    pub fn monitor(&self) -> &Arc<EnergyMonitor> {
        &self.monitor
    }

    /// Setting this flag interrupts the run at the next check point.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn results_path(&self) -> PathBuf {
        self.monitor.run_dir().join(RESULTS_FILE)
    }

    pub fn report_path(&self) -> PathBuf {
        self.monitor.run_dir().join(REPORT_FILE)
    }

    /// Prepare `env`, measure the workload against `backend`, write the
    /// summary documents, and tear `env` down.
    ///
    /// On failure after preparation the monitor is stopped and its partial
    /// summary persisted with `status` set to `failed` or `interrupted`.
    pub fn run(
        &self,
        env: &mut dyn Environment,
        backend: &dyn CompletionBackend,
    ) -> Result<BenchmarkOutcome> {
        log::info!(
            "benchmark {}: {} ({}) on {}",
            self.monitor.run_name(),
            self.config.llm,
            self.model_repo,
            self.config.workload.display()
        );

        let cleanup = Cleanup {
            env,
            monitor: &self.monitor,
        };
        cleanup.env.prepare(&self.cancel)?;

        let result = self.measure(backend);
        if let Err(e) = &result {
            self.record_failure(e);
        }
        drop(cleanup);
        result
    }

    fn measure(&self, backend: &dyn CompletionBackend) -> Result<BenchmarkOutcome> {
        let mut results = ResultsWriter::open(&self.results_path())?;
        self.monitor.start()?;

        let workload = run_workload(backend, &self.workload, &mut results, &self.cancel)?;

        let mut metadata = self.base_metadata();
        metadata.extend(workload.to_metadata());
        metadata.insert("status".into(), Value::from("completed"));
        let summary = self.monitor.stop(metadata)?;
        let (energy_summary_path, report_path) = self.persist(&summary)?;

        Ok(BenchmarkOutcome {
            llm: self.config.llm.clone(),
            workload_path: self.config.workload.clone(),
            summary,
            workload,
            energy_summary_path,
            report_path,
        })
    }

    fn record_failure(&self, error: &Error) {
        if self.monitor.state() != MonitorState::Running {
            return;
        }
        let status = match error {
            Error::Interrupted => "interrupted",
            _ => "failed",
        };
        log::warn!("benchmark {status}: {error}");

        let mut metadata = self.base_metadata();
        metadata.insert("status".into(), Value::from(status));
        metadata.insert("error".into(), Value::from(error.to_string()));
        match self.monitor.stop(metadata) {
            Ok(summary) => {
                if let Err(e) = self.persist(&summary) {
                    log::warn!("failed to write partial summary: {e}");
                }
            }
            Err(e) => log::warn!("failed to stop energy monitor: {e}"),
        }
    }

    fn persist(&self, summary: &Summary) -> Result<(PathBuf, PathBuf)> {
        let energy_summary_path = self.monitor.persist_summary(summary)?;
        let report_path = self.report_path();
        let mut report = summary.clone();
        report.insert(
            "energy_summary_path",
            energy_summary_path.display().to_string(),
        );
        report.persist(&report_path)?;
        Ok((energy_summary_path, report_path))
    }

    fn base_metadata(&self) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert("llm".into(), Value::from(self.config.llm.clone()));
        metadata.insert("llm_repo".into(), Value::from(self.model_repo));
        metadata.insert(
            "workload".into(),
            Value::from(self.config.workload.display().to_string()),
        );
        metadata
    }
}

/// Stops the monitor (if still running) and tears the environment down on
/// every exit path, unwinding included.
struct Cleanup<'a> {
    env: &'a mut dyn Environment,
    monitor: &'a EnergyMonitor,
}

impl Drop for Cleanup<'_> {
    fn drop(&mut self) {
        if self.monitor.state() == MonitorState::Running {
            if let Err(e) = self.monitor.stop(Metadata::new()) {
                log::warn!("failed to stop energy monitor: {e}");
            }
        }
        self.env.teardown();
    }
}

/// Human-readable summary printed when a benchmark completes.
pub fn completion_report(outcome: &BenchmarkOutcome) -> String {
    let s = &outcome.summary;
    let w = &outcome.workload;
    let mut out = String::new();
    out.push_str(&format!("Benchmark complete: {}\n", s.run_name));
    out.push_str(&format!("  Model:            {}\n", outcome.llm));
    out.push_str(&format!(
        "  Workload:         {} ({} prompts, {} failed)\n",
        outcome.workload_path.display(),
        w.n_prompts,
        w.n_failed
    ));
    out.push_str(&format!("  Duration:         {:.2} s\n", s.duration_s));
    out.push_str(&format!("  Samples:          {}\n", s.samples));
    out.push_str(&format!("  Avg power:        {:.2} W\n", s.avg_power_w));
    out.push_str(&format!("  Max power:        {:.2} W\n", s.max_power_w));
    out.push_str(&format!("  Energy:           {:.4} Wh\n", s.energy_wh));
    out.push_str(&format!("  Avg GPU util:     {:.1} %\n", s.avg_util_pct));
    out.push_str(&format!("  Avg GPU memory:   {:.0} MiB\n", s.avg_mem_mib));
    out.push_str("\nFiles:\n");
    for path in [
        s.trace_csv_path.as_path(),
        outcome.energy_summary_path.as_path(),
        outcome.report_path.as_path(),
        w.results_file.as_path(),
    ] {
        out.push_str(&format!("  {}\n", path.display()));
    }
    out
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::remote::CommandSpec;
    use crate::sampler::TelemetrySource;
    use crate::summary::read_document;
    use std::cell::Cell;
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    const SAMPLER: &str =
        "while true; do echo 't,100.0,50,1000,8000'; echo 't,130.0,70,1200,8000'; sleep 0.02; done";

    #[derive(Default)]
    struct FakeEnv {
        fail_prepare: bool,
        prepared: u32,
        torn_down: u32,
    }

    impl Environment for FakeEnv {
        fn prepare(&mut self, _cancel: &AtomicBool) -> Result<()> {
            self.prepared += 1;
            if self.fail_prepare {
                return Err(Error::ReadinessTimeout(Duration::from_secs(1)));
            }
            Ok(())
        }

        fn teardown(&mut self) {
            self.torn_down += 1;
        }
    }

    struct Echo {
        calls: Cell<usize>,
        fail_on: Option<usize>,
        cancel_after: Option<(usize, Arc<AtomicBool>)>,
    }

    impl Echo {
        fn new() -> Self {
            Self {
                calls: Cell::new(0),
                fail_on: None,
                cancel_after: None,
            }
        }
    }

    impl CompletionBackend for Echo {
        fn complete(&self, prompt: &str) -> Result<String> {
            let n = self.calls.get();
            self.calls.set(n + 1);
            std::thread::sleep(Duration::from_millis(60));
            if let Some((after, flag)) = &self.cancel_after {
                if n + 1 == *after {
                    flag.store(true, Ordering::SeqCst);
                }
            }
            if self.fail_on == Some(n) {
                return Err(Error::InvalidResponse("boom".into()));
            }
            Ok(prompt.to_uppercase())
        }
    }

    fn setup(dir: &Path, llm: &str) -> BenchmarkConfig {
        let workload = dir.join("prompts.csv");
        fs::write(&workload, "text\nalpha\nbeta\ngamma\n").unwrap();
        BenchmarkConfig {
            llm: llm.to_string(),
            workload,
            monitor: MonitorConfig {
                interval_ms: 20,
                output_dir: dir.join("runs"),
                run_name: Some("bench".to_string()),
                source: TelemetrySource::Command(CommandSpec::shell(SAMPLER)),
                terminate_timeout: Duration::from_millis(500),
                capture_timeout: Duration::from_secs(5),
            },
        }
    }

    #[test]
    fn unknown_model_is_rejected_before_launch() {
        let tmp = tempfile::tempdir().unwrap();
        let err = Benchmark::new(setup(tmp.path(), "GPT-9")).err().unwrap();
        assert!(matches!(err, Error::UnknownModel(ref m) if m == "GPT-9"));
    }

    #[test]
    fn missing_workload_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = setup(tmp.path(), "Llama-3-8B");
        config.workload = tmp.path().join("nope.csv");
        let err = Benchmark::new(config).err().unwrap();
        assert!(matches!(err, Error::WorkloadNotFound(_)));
    }

    #[test]
    fn completed_run_writes_all_artifacts() {
        let tmp = tempfile::tempdir().unwrap();
        let bench = Benchmark::new(setup(tmp.path(), "Granite-8B")).unwrap();
        assert_eq!(bench.model_repo(), "ibm-granite/granite-3.3-8b-base");

        let mut env = FakeEnv::default();
        let mut backend = Echo::new();
        backend.fail_on = Some(1);
        let outcome = bench.run(&mut env, &backend).unwrap();

        assert_eq!((env.prepared, env.torn_down), (1, 1));
        assert_eq!(bench.monitor().state(), MonitorState::Stopped);
        assert_eq!(outcome.workload.n_prompts, 3);
        assert_eq!(outcome.workload.n_failed, 1);
        assert!(outcome.summary.samples > 0);
        assert!(outcome.summary.energy_wh > 0.0);

        let doc = read_document(&outcome.energy_summary_path).unwrap();
        assert_eq!(doc["llm"], "Granite-8B");
        assert_eq!(doc["status"], "completed");
        assert_eq!(doc["n_prompts"], 3);
        assert!(doc.contains_key("workload_duration_s"));
        assert!(doc.contains_key("energy_Wh"));

        let report = read_document(&outcome.report_path).unwrap();
        assert_eq!(report["run_name"], "bench");
        assert!(report.contains_key("energy_summary_path"));

        let rows = fs::read_to_string(bench.results_path()).unwrap();
        assert!(rows.starts_with("idx,prompt,reply\n"));
        assert!(rows.contains("1,alpha,ALPHA"));
        assert!(rows.contains("2,beta,__ERROR__: "));
        assert!(rows.contains("3,gamma,GAMMA"));

        let text = completion_report(&outcome);
        assert!(text.contains("Granite-8B"));
        assert!(text.contains(" Wh"));
    }

    #[test]
    fn failed_prepare_tears_down_without_monitoring() {
        let tmp = tempfile::tempdir().unwrap();
        let bench = Benchmark::new(setup(tmp.path(), "Llama-3-8B")).unwrap();
        let mut env = FakeEnv {
            fail_prepare: true,
            ..Default::default()
        };

        let err = bench.run(&mut env, &Echo::new()).err().unwrap();
        assert!(matches!(err, Error::ReadinessTimeout(_)));
        assert_eq!(env.torn_down, 1);
        assert_eq!(bench.monitor().state(), MonitorState::Idle);
        assert!(!bench.results_path().exists());
    }

    #[test]
    fn interruption_stops_monitor_and_tears_down() {
        let tmp = tempfile::tempdir().unwrap();
        let bench = Benchmark::new(setup(tmp.path(), "Llama-3-8B")).unwrap();
        let mut env = FakeEnv::default();
        let mut backend = Echo::new();
        backend.cancel_after = Some((1, bench.cancel_flag()));

        let err = bench.run(&mut env, &backend).err().unwrap();
        assert!(matches!(err, Error::Interrupted));
        assert_eq!(backend.calls.get(), 1);
        assert_eq!(env.torn_down, 1);
        assert_eq!(bench.monitor().state(), MonitorState::Stopped);

        let doc = read_document(&bench.monitor().summary_path()).unwrap();
        assert_eq!(doc["status"], "interrupted");
        assert_eq!(doc["error"], "benchmark interrupted");
        assert!(bench.report_path().exists());
    }
}
