//! Lightweight Ollama client for text generation.
//!
//! Wraps `POST {endpoint}/api/generate` with `stream=false` and returns the
//! `response` field as plain text.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result, status_error};

/// Thin client for the local Ollama API.
pub struct OllamaService {
    client: reqwest::Client,
    cfg: GatewayConfig,
    url_generate: String,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<GenerateOptions>,
}

#[derive(Serialize)]
struct GenerateOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

impl OllamaService {
    /// Creates the service from the given config.
    ///
    /// # Errors
    /// - [`crate::error::ConfigError::InvalidEndpoint`] for a bad endpoint
    /// - [`GatewayError::Transport`] if the HTTP client cannot be built
    pub fn new(cfg: GatewayConfig) -> Result<Self> {
        cfg.validate()?;

        let timeout = cfg
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| Duration::from_secs(120));

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .http2_keep_alive_interval(Some(Duration::from_secs(20)))
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .tcp_keepalive(Some(Duration::from_secs(30)))
            .build()?;

        let base = cfg.endpoint.trim_end_matches('/').to_string();
        let url_generate = format!("{base}/api/generate");

        info!(
            model = %cfg.model,
            endpoint = %cfg.endpoint,
            "OllamaService initialized"
        );

        Ok(Self {
            client,
            cfg,
            url_generate,
        })
    }

    /// Generates text for the prompt and returns it verbatim.
    ///
    /// # Errors
    /// Same classification as the OpenAI-compatible path: non-2xx responses
    /// map through [`status_error`], transport failures through
    /// [`GatewayError::Transport`], bad payloads through
    /// [`GatewayError::Decode`].
    pub async fn complete(&self, prompt: &str) -> Result<String> {
        let started = Instant::now();
        let options = if self.cfg.max_tokens.is_some() || self.cfg.temperature.is_some() {
            Some(GenerateOptions {
                num_predict: self.cfg.max_tokens,
                temperature: self.cfg.temperature,
            })
        } else {
            None
        };

        let body = GenerateRequest {
            model: &self.cfg.model,
            prompt,
            stream: false,
            options,
        };

        debug!(
            model = %self.cfg.model,
            prompt_len = prompt.len(),
            "POST {}", self.url_generate
        );

        let resp = self
            .client
            .post(&self.url_generate)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(status_error(status, &self.url_generate, &text, None));
        }

        let out: GenerateResponse = resp
            .json()
            .await
            .map_err(|e| GatewayError::Decode(format!("serde error: {e}; expected `response`")))?;

        debug!(
            model = %self.cfg.model,
            latency_ms = started.elapsed().as_millis(),
            "generate completed"
        );

        Ok(out.response)
    }
}
