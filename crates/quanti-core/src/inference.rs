//! Client for OpenAI-compatible completion servers (vLLM).
//!
//! Only two endpoints are used:
//! - `POST /v1/completions` with `{model, prompt, max_tokens, temperature}`
//! - `GET /health`, which answers 200 once the model is loaded

use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Per-request generation settings.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionSettings {
    /// Model id as known to the server (the Hugging Face repo for vLLM).
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl CompletionSettings {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            max_tokens: 128,
            temperature: 0.7,
        }
    }
}

/// OpenAI-compatible completion request.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest<'a> {
    pub model: &'a str,
    pub prompt: &'a str,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// OpenAI-compatible completion response (only the fields we read).
#[derive(Debug, Clone, Deserialize)]
pub struct CompletionResponse {
    pub choices: Vec<CompletionChoice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompletionChoice {
    pub text: String,
}

/// Anything that turns a prompt into a reply. The workload runner only
/// depends on this.
pub trait CompletionBackend {
    fn complete(&self, prompt: &str) -> Result<String>;
}

/// Blocking HTTP client bound to one server and one model.
pub struct InferenceClient {
    client: Client,
    base_url: String,
    settings: CompletionSettings,
    health_timeout: Duration,
}

impl InferenceClient {
    /// `base_url` is the server root, e.g. `http://127.0.0.1:8000`.
    pub fn new(
        base_url: &str,
        settings: CompletionSettings,
        request_timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            settings,
            health_timeout: Duration::from_secs(2),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn settings(&self) -> &CompletionSettings {
        &self.settings
    }

    /// `true` when `GET /health` answers with a success status.
    pub fn health_check(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self.client.get(&url).timeout(self.health_timeout).send() {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                log::trace!("health probe {url} failed: {e}");
                false
            }
        }
    }
}

impl CompletionBackend for InferenceClient {
    fn complete(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/v1/completions", self.base_url);
        let request = CompletionRequest {
            model: &self.settings.model,
            prompt,
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
        };

        let response: CompletionResponse = self
            .client
            .post(&url)
            .json(&request)
            .send()?
            .error_for_status()?
            .json()?;

        response
            .choices
            .into_iter()
            .next()
            .map(|c| c.text.trim().to_string())
            .ok_or_else(|| Error::InvalidResponse(format!("no choices in response from {url}")))
    }
}
