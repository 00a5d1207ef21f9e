//! `quanti bench`: run a workload against an inference server under the
//! energy monitor.

use std::path::PathBuf;
use std::time::Duration;

use quanti_core::{
    Benchmark, BenchmarkConfig, CompletionSettings, Environment, Error, ExternalServer,
    InferenceClient, ManagedServer, MonitorConfig, ServerConfig, completion_report,
};

use super::{Target, fail, install_interrupt};

pub struct BenchCommandConfig<'a> {
    pub llm: &'a str,
    pub workload: &'a str,
    pub output: &'a str,
    pub run_name: Option<&'a str>,
    pub interval_ms: u64,
    pub server_url: Option<&'a str>,
    pub port: u16,
    pub max_model_len: u32,
    pub gpu_memory_utilization: f64,
    pub venv: Option<&'a str>,
    pub kill_stale: bool,
    pub startup_timeout: u64,
    pub request_timeout: u64,
    pub max_tokens: u32,
    pub temperature: f32,
    pub target: Target,
}

/// Run the bench command.
pub fn run(cfg: BenchCommandConfig<'_>) {
    let remote = cfg.target.remote();
    let monitor = MonitorConfig {
        interval_ms: cfg.interval_ms,
        output_dir: PathBuf::from(cfg.output),
        run_name: cfg.run_name.map(str::to_string),
        source: cfg.target.telemetry_source(),
        ..Default::default()
    };

    let bench = match Benchmark::new(BenchmarkConfig {
        llm: cfg.llm.to_string(),
        workload: PathBuf::from(cfg.workload),
        monitor,
    }) {
        Ok(b) => b,
        Err(e @ Error::UnknownModel(_)) => {
            eprintln!("Error: {e}");
            eprintln!("Run `quanti models` for the supported aliases.");
            std::process::exit(1);
        }
        Err(e) => fail("invalid benchmark", e),
    };

    let server = ServerConfig {
        port: cfg.port,
        max_model_len: cfg.max_model_len,
        gpu_memory_utilization: cfg.gpu_memory_utilization,
        venv: cfg.venv.map(str::to_string),
        remote,
        base_url: cfg.server_url.map(str::to_string),
        kill_stale: cfg.kill_stale,
        startup_timeout: Duration::from_secs(cfg.startup_timeout),
        ..Default::default()
    };

    let mut settings = CompletionSettings::new(bench.model_repo());
    settings.max_tokens = cfg.max_tokens;
    settings.temperature = cfg.temperature;
    let request_timeout = Duration::from_secs(cfg.request_timeout);
    let base_url = server.base_url();
    let client = InferenceClient::new(&base_url, settings.clone(), request_timeout)
        .unwrap_or_else(|e| fail("creating HTTP client", e));
    let probe = InferenceClient::new(&base_url, settings, request_timeout)
        .unwrap_or_else(|e| fail("creating HTTP client", e));

    let mut env: Box<dyn Environment> = if cfg.server_url.is_some() {
        Box::new(ExternalServer::new(
            probe,
            server.startup_timeout,
            server.poll_interval,
        ))
    } else {
        Box::new(ManagedServer::new(server, bench.model_repo(), probe))
    };

    install_interrupt(bench.cancel_flag());

    println!("Benchmark {}", bench.monitor().run_name());
    println!("  Model:     {} ({})", cfg.llm, bench.model_repo());
    println!(
        "  Workload:  {} ({} prompts)",
        cfg.workload,
        bench.workload().len()
    );
    println!("  Server:    {base_url}");
    println!("  Interval:  {}ms", cfg.interval_ms);
    println!("  Output:    {}", bench.monitor().run_dir().display());
    println!();

    match bench.run(env.as_mut(), &client) {
        Ok(outcome) => {
            println!();
            print!("{}", completion_report(&outcome));
        }
        Err(Error::Interrupted) => {
            eprintln!(
                "Benchmark interrupted; partial results in {}",
                bench.monitor().run_dir().display()
            );
            std::process::exit(1);
        }
        Err(e) => fail("benchmark failed", e),
    }
}
