//! Inference server bring-up: model aliases, the `vllm serve` command line,
//! and readiness polling.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::benchmark::Environment;
use crate::error::{Error, Result};
use crate::inference::InferenceClient;
use crate::process::ManagedChild;
use crate::remote::{CommandSpec, RemoteHost};

/// Supported model aliases and the Hugging Face repos they serve.
pub const MODELS: &[(&str, &str)] = &[
    ("Llama-3-8B", "meta-llama/Llama-3.1-8B-Instruct"),
    ("Mistral-8B", "solidrust/Mistral-NeMo-Minitron-8B-Base-AWQ"),
    ("Granite-8B", "ibm-granite/granite-3.3-8b-base"),
    ("Llama-3-8B-AWQ", "hugging-quants/Meta-Llama-3.1-8B-Instruct-AWQ-INT4"),
    ("Granite-8B-AWQ", "RedHatAI/granite-3.1-8b-instruct-quantized.w4a16"),
    ("Mistral-8B-AWQ", "solidrust/Mistral-NeMo-Minitron-8B-Base-AWQ"),
];

/// Repo for a model alias (exact, case-sensitive match).
pub fn resolve_model(alias: &str) -> Option<&'static str> {
    MODELS
        .iter()
        .find(|(name, _)| *name == alias)
        .map(|(_, repo)| *repo)
}

/// How to launch and reach the inference server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub max_model_len: u32,
    pub max_num_seqs: u32,
    pub gpu_memory_utilization: f64,
    /// Virtualenv directory activated before `vllm serve`.
    pub venv: Option<String>,
    /// Run the server on this host instead of locally.
    pub remote: Option<RemoteHost>,
    /// Base URL clients use; defaults to `http://127.0.0.1:<port>`.
    pub base_url: Option<String>,
    /// `pkill -f "vllm serve"` before launching.
    pub kill_stale: bool,
    pub startup_timeout: Duration,
    pub poll_interval: Duration,
    pub terminate_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            max_model_len: 2048,
            max_num_seqs: 32,
            gpu_memory_utilization: 0.85,
            venv: None,
            remote: None,
            base_url: None,
            kill_stale: false,
            startup_timeout: Duration::from_secs(300),
            poll_interval: Duration::from_secs(3),
            terminate_timeout: Duration::from_secs(10),
        }
    }
}

impl ServerConfig {
    pub fn base_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| format!("http://127.0.0.1:{}", self.port))
    }

    /// Full launch command for `repo`, venv activation and SSH included.
    pub fn serve_command(&self, repo: &str) -> CommandSpec {
        let serve = CommandSpec::new(
            "vllm",
            [
                "serve".to_string(),
                repo.to_string(),
                "--port".to_string(),
                self.port.to_string(),
                "--max-model-len".to_string(),
                self.max_model_len.to_string(),
                "--max-num-seqs".to_string(),
                self.max_num_seqs.to_string(),
                "--gpu-memory-utilization".to_string(),
                self.gpu_memory_utilization.to_string(),
                "--host".to_string(),
                "0.0.0.0".to_string(),
                "--trust-remote-code".to_string(),
            ],
        );
        let local = match &self.venv {
            Some(venv) => CommandSpec::shell(format!(
                ". {venv}/bin/activate && exec {}",
                serve.to_shell_string()
            )),
            None => serve,
        };
        self.on_target(local)
    }

    /// Command that kills leftover `vllm serve` processes.
    pub fn stale_cleanup_command(&self) -> CommandSpec {
        self.on_target(CommandSpec::shell("pkill -f '[v]llm serve' || true"))
    }

    fn on_target(&self, cmd: CommandSpec) -> CommandSpec {
        match &self.remote {
            Some(host) => cmd.over_ssh(host),
            None => cmd,
        }
    }
}

/// Poll `probe` until it succeeds.
///
/// Fails with [`Error::ServerExited`] as soon as `exited` reports an exit,
/// [`Error::Interrupted`] when `cancel` is set, and
/// [`Error::ReadinessTimeout`] once `timeout` has passed.
pub fn wait_until_ready(
    mut probe: impl FnMut() -> bool,
    mut exited: impl FnMut() -> Option<String>,
    timeout: Duration,
    poll_interval: Duration,
    cancel: &AtomicBool,
) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        if cancel.load(Ordering::SeqCst) {
            return Err(Error::Interrupted);
        }
        if let Some(status) = exited() {
            return Err(Error::ServerExited(status));
        }
        if probe() {
            return Ok(());
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(Error::ReadinessTimeout(timeout));
        }
        let next_probe = now + poll_interval.min(deadline - now);
        while Instant::now() < next_probe && !cancel.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(50));
        }
    }
}

// ---------------------------------------------------------------------------
// Environments
// ---------------------------------------------------------------------------

/// Launches `vllm serve` and owns the process until teardown.
pub struct ManagedServer {
    config: ServerConfig,
    repo: String,
    client: InferenceClient,
    command: Option<CommandSpec>,
    child: Option<ManagedChild>,
}

impl ManagedServer {
    /// `client` is used only for health probes.
    pub fn new(config: ServerConfig, repo: impl Into<String>, client: InferenceClient) -> Self {
        Self {
            config,
            repo: repo.into(),
            client,
            command: None,
            child: None,
        }
    }

    /// Launch `command` instead of the generated `vllm serve` line.
    pub fn with_command(mut self, command: CommandSpec) -> Self {
        self.command = Some(command);
        self
    }

    /// Pid of the launched server, if running.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(ManagedChild::id)
    }
}

impl Environment for ManagedServer {
    fn prepare(&mut self, cancel: &AtomicBool) -> Result<()> {
        if self.config.kill_stale {
            let cleanup = self.config.stale_cleanup_command();
            log::info!("stopping stale vLLM processes: {cleanup}");
            if let Err(e) = cleanup.to_command().stdin(Stdio::null()).status() {
                log::warn!("stale process cleanup failed: {e}");
            }
        }

        let spec = match &self.command {
            Some(command) => command.clone(),
            None => self.config.serve_command(&self.repo),
        };
        log::info!("launching inference server: {spec}");
        let child = self
            .child
            .insert(ManagedChild::spawn(&spec, Stdio::null(), Stdio::null())?);

        log::info!(
            "waiting up to {}s for {} to become ready",
            self.config.startup_timeout.as_secs(),
            self.client.base_url()
        );
        let client = &self.client;
        wait_until_ready(
            || client.health_check(),
            || match child.try_wait() {
                Ok(Some(status)) => Some(status.to_string()),
                Ok(None) => None,
                Err(e) => Some(e.to_string()),
            },
            self.config.startup_timeout,
            self.config.poll_interval,
            cancel,
        )?;
        log::info!("inference server ready at {}", self.client.base_url());
        Ok(())
    }

    fn teardown(&mut self) {
        if let Some(mut child) = self.child.take() {
            log::info!("stopping inference server (pid {})", child.id());
            if let Err(e) = child.terminate(self.config.terminate_timeout) {
                log::warn!("failed to stop inference server: {e}");
            }
        }
    }
}

/// A server someone else started; only readiness is checked.
pub struct ExternalServer {
    client: InferenceClient,
    startup_timeout: Duration,
    poll_interval: Duration,
}

impl ExternalServer {
    pub fn new(
        client: InferenceClient,
        startup_timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            client,
            startup_timeout,
            poll_interval,
        }
    }
}

impl Environment for ExternalServer {
    fn prepare(&mut self, cancel: &AtomicBool) -> Result<()> {
        let client = &self.client;
        wait_until_ready(
            || client.health_check(),
            || None,
            self.startup_timeout,
            self.poll_interval,
            cancel,
        )
    }

    fn teardown(&mut self) {}
}
