//! OpenAI-compatible chat-completions client.
//!
//! Thin wrapper over `POST {endpoint}/v1/chat/completions` with `stream=false`
//! semantics: one prompt in, the assistant message text out. Works against
//! OpenAI itself and the many local servers that mimic its API.

use std::time::{Duration, Instant};

use reqwest::header;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result, status_error};

/// Client for OpenAI-style chat completions.
pub struct OpenAiCompatService {
    client: reqwest::Client,
    cfg: GatewayConfig,
    url_chat: String,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

impl OpenAiCompatService {
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

        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        if let Some(key) = cfg.api_key.as_deref() {
            let value = header::HeaderValue::from_str(&format!("Bearer {key}"))
                .map_err(|e| GatewayError::Decode(format!("invalid API key header: {e}")))?;
            headers.insert(header::AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;

        let base = cfg.endpoint.trim_end_matches('/').to_string();
        let url_chat = format!("{base}/v1/chat/completions");

        info!(
            model = %cfg.model,
            endpoint = %cfg.endpoint,
            "OpenAiCompatService initialized"
        );

        Ok(Self {
            client,
            cfg,
            url_chat,
        })
    }

    /// Performs a non-streaming chat completion and returns the message text.
    ///
    /// # Errors
    /// - [`GatewayError::SizeRejected`] / [`GatewayError::RateLimited`] /
    ///   [`GatewayError::HttpStatus`] for non-2xx responses (classified)
    /// - [`GatewayError::Transport`] for network failures
    /// - [`GatewayError::Decode`] if the payload cannot be parsed
    /// - [`GatewayError::EmptyContent`] when no choice carries content
    pub async fn complete(&self, prompt: &str) -> Result<String> {
        let started = Instant::now();
        let body = ChatCompletionRequest {
            model: &self.cfg.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: self.cfg.max_tokens,
            temperature: self.cfg.temperature,
        };

        debug!(
            model = %self.cfg.model,
            prompt_len = prompt.len(),
            "POST {}", self.url_chat
        );

        let resp = self.client.post(&self.url_chat).json(&body).send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let retry_after = parse_retry_after(resp.headers());
            let text = resp.text().await.unwrap_or_default();
            return Err(status_error(status, &self.url_chat, &text, retry_after));
        }

        let out: ChatCompletionResponse = resp.json().await.map_err(|e| {
            GatewayError::Decode(format!(
                "serde error: {e}; expected `choices[0].message.content`"
            ))
        })?;

        let content = out
            .choices
            .into_iter()
            .find_map(|c| c.message.content)
            .ok_or(GatewayError::EmptyContent)?;

        debug!(
            model = %self.cfg.model,
            latency_ms = started.elapsed().as_millis(),
            "chat completion completed"
        );

        Ok(content)
    }
}

/// Reads a `Retry-After: <secs>` header when present.
fn parse_retry_after(headers: &header::HeaderMap) -> Option<u64> {
    headers
        .get(header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}
