//! CLI for quanti: energy benchmarking for LLM inference.

mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "quanti")]
#[command(about = "quanti: measure the GPU energy cost of LLM inference workloads")]
#[command(version = quanti_core::VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch an inference server, run a prompt workload against it and
    /// record GPU energy for the duration of the workload
    Bench {
        /// Model alias (see `quanti models`)
        #[arg(long, default_value = "Llama-3-8B")]
        llm: String,

        /// Workload CSV with a `text` column
        #[arg(long)]
        workload: String,

        /// Output directory for run artifacts
        #[arg(long, default_value = "runs")]
        output: String,

        /// Run name (default: run_<timestamp>_<id>)
        #[arg(long)]
        run_name: Option<String>,

        /// Telemetry sampling interval in milliseconds
        #[arg(long, default_value = "200")]
        interval_ms: u64,

        /// Use an already running server at this URL instead of launching one
        #[arg(long)]
        server_url: Option<String>,

        /// Port passed to `vllm serve`
        #[arg(long, default_value = "8000")]
        port: u16,

        #[arg(long, default_value = "2048")]
        max_model_len: u32,

        #[arg(long, default_value = "0.85")]
        gpu_memory_utilization: f64,

        /// Virtualenv to activate before `vllm serve` (e.g. ~/vllm-env)
        #[arg(long)]
        venv: Option<String>,

        /// Kill leftover `vllm serve` processes before launching
        #[arg(long)]
        kill_stale: bool,

        /// Seconds to wait for the server to report healthy
        #[arg(long, default_value = "300")]
        startup_timeout: u64,

        /// Per-request timeout in seconds
        #[arg(long, default_value = "30")]
        request_timeout: u64,

        #[arg(long, default_value = "128")]
        max_tokens: u32,

        #[arg(long, default_value = "0.7")]
        temperature: f32,

        #[command(flatten)]
        target: TargetArgs,
    },

    /// Record GPU telemetry for a fixed duration or until Ctrl+C
    Monitor {
        /// Recording duration (e.g. "90s", "5m"); default: until Ctrl+C
        #[arg(long)]
        duration: Option<String>,

        /// Output directory for run artifacts
        #[arg(long, default_value = "runs")]
        output: String,

        #[arg(long)]
        run_name: Option<String>,

        /// Telemetry sampling interval in milliseconds
        #[arg(long, default_value = "200")]
        interval_ms: u64,

        /// Metadata tags as key:value pairs
        #[arg(long = "tag")]
        tags: Vec<String>,

        #[command(flatten)]
        target: TargetArgs,
    },

    /// List recorded runs, or show one run in detail
    Runs {
        /// Path to a run directory to show
        run: Option<String>,

        /// Directory containing runs
        #[arg(long, default_value = "runs")]
        dir: String,
    },

    /// List supported model aliases
    Models,
}

/// Where telemetry (and the inference server) live.
#[derive(clap::Args)]
struct TargetArgs {
    /// GPU host reachable over SSH. Defaults to SSH_TARGET_HOST (with
    /// SSH_USER, SSH_JUMP_HOST, SSH_JUMP_PORT) when set
    #[arg(long)]
    ssh_host: Option<String>,

    /// Ignore SSH_* environment variables and run everything locally
    #[arg(long, conflicts_with = "ssh_host")]
    local: bool,

    /// Custom telemetry command run through `sh -c`, printing
    /// `timestamp,power,util,mem_used,mem_total` lines
    #[arg(long)]
    sampler_cmd: Option<String>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Bench {
            llm,
            workload,
            output,
            run_name,
            interval_ms,
            server_url,
            port,
            max_model_len,
            gpu_memory_utilization,
            venv,
            kill_stale,
            startup_timeout,
            request_timeout,
            max_tokens,
            temperature,
            target,
        } => commands::bench::run(commands::bench::BenchCommandConfig {
            llm: &llm,
            workload: &workload,
            output: &output,
            run_name: run_name.as_deref(),
            interval_ms,
            server_url: server_url.as_deref(),
            port,
            max_model_len,
            gpu_memory_utilization,
            venv: venv.as_deref(),
            kill_stale,
            startup_timeout,
            request_timeout,
            max_tokens,
            temperature,
            target: target.into(),
        }),
        Commands::Monitor {
            duration,
            output,
            run_name,
            interval_ms,
            tags,
            target,
        } => commands::monitor::run(
            duration.as_deref(),
            &output,
            run_name.as_deref(),
            interval_ms,
            &tags,
            target.into(),
        ),
        Commands::Runs { run, dir } => commands::runs::run(run.as_deref(), &dir),
        Commands::Models => commands::models::run(),
    }
}

impl From<TargetArgs> for commands::Target {
    fn from(args: TargetArgs) -> Self {
        Self {
            ssh_host: args.ssh_host,
            local: args.local,
            sampler_cmd: args.sampler_cmd,
        }
    }
}
