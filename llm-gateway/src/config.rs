//! Gateway configuration: response format discriminator + model parameters.
//!
//! The payload shape of the analysis backend is not fixed (OpenAI-style chat
//! completions vs. Ollama's generate API), so the format is a tagged variant
//! resolved from configuration rather than sniffed from responses.

use crate::error::{ConfigError, Result};

/// Wire format spoken by the analysis backend.
///
/// Adding more formats later (Anthropic, Mistral API) means extending this
/// enum and its service module; callers only ever see `complete()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    /// OpenAI-compatible `/v1/chat/completions`.
    OpenAiCompat,
    /// Local Ollama `/api/generate`.
    Ollama,
}

/// Configuration for the gateway's single backend.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Which wire format the backend speaks.
    pub format: ResponseFormat,
    /// Model identifier string (e.g., `"gpt-4o-mini"`, `"qwen3:14b"`).
    pub model: String,
    /// Base endpoint URL (scheme + host, no trailing path).
    pub endpoint: String,
    /// Optional API key for backends that require authentication.
    pub api_key: Option<String>,
    /// Maximum number of tokens to generate.
    pub max_tokens: Option<u32>,
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Request timeout in seconds.
    pub timeout_secs: Option<u64>,
}

impl GatewayConfig {
    /// Builds the config from environment variables.
    ///
    /// Recognized variables: `LLM_FORMAT` (`openai`|`ollama`, default
    /// `openai`), `LLM_MODEL`, `LLM_ENDPOINT`, `LLM_API_KEY`,
    /// `LLM_MAX_TOKENS`, `LLM_TEMPERATURE`, `LLM_TIMEOUT_SECS`.
    ///
    /// # Errors
    /// Returns [`ConfigError::UnsupportedFormat`] for an unknown `LLM_FORMAT`
    /// and [`ConfigError::InvalidNumber`] for unparseable numeric values.
    pub fn from_env() -> Result<Self> {
        let format = match std::env::var("LLM_FORMAT")
            .unwrap_or_else(|_| "openai".into())
            .to_ascii_lowercase()
            .as_str()
        {
            "openai" | "openai-compat" => ResponseFormat::OpenAiCompat,
            "ollama" => ResponseFormat::Ollama,
            other => return Err(ConfigError::UnsupportedFormat(other.to_string()).into()),
        };

        let default_endpoint = match format {
            ResponseFormat::OpenAiCompat => "https://api.openai.com",
            ResponseFormat::Ollama => "http://127.0.0.1:11434",
        };
        let default_model = match format {
            ResponseFormat::OpenAiCompat => "gpt-4o-mini",
            ResponseFormat::Ollama => "qwen3:14b",
        };

        let endpoint =
            std::env::var("LLM_ENDPOINT").unwrap_or_else(|_| default_endpoint.to_string());
        let model = std::env::var("LLM_MODEL").unwrap_or_else(|_| default_model.to_string());
        let api_key = std::env::var("LLM_API_KEY").ok().filter(|k| !k.is_empty());

        Ok(GatewayConfig {
            format,
            model,
            endpoint,
            api_key,
            max_tokens: env_opt_u32("LLM_MAX_TOKENS")?,
            temperature: env_opt_f32("LLM_TEMPERATURE")?,
            timeout_secs: env_opt_u64("LLM_TIMEOUT_SECS")?,
        })
    }

    /// Validates that the endpoint carries an http/https scheme.
    pub fn validate(&self) -> Result<()> {
        let endpoint = self.endpoint.trim();
        if endpoint.is_empty()
            || !(endpoint.starts_with("http://") || endpoint.starts_with("https://"))
        {
            return Err(ConfigError::InvalidEndpoint(self.endpoint.clone()).into());
        }
        Ok(())
    }
}

fn env_opt_u32(name: &'static str) -> Result<Option<u32>> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => v.parse::<u32>().map(Some).map_err(|_| {
            ConfigError::InvalidNumber {
                var: name,
                reason: "expected u32",
            }
            .into()
        }),
        _ => Ok(None),
    }
}

fn env_opt_u64(name: &'static str) -> Result<Option<u64>> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => v.parse::<u64>().map(Some).map_err(|_| {
            ConfigError::InvalidNumber {
                var: name,
                reason: "expected u64",
            }
            .into()
        }),
        _ => Ok(None),
    }
}

fn env_opt_f32(name: &'static str) -> Result<Option<f32>> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => v.parse::<f32>().map(Some).map_err(|_| {
            ConfigError::InvalidNumber {
                var: name,
                reason: "expected f32",
            }
            .into()
        }),
        _ => Ok(None),
    }
}
