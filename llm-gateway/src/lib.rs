//! One-call gateway to an external text-analysis LLM backend.
//!
//! The surrounding review engine only needs a single operation: hand a prompt
//! (instructions + file contents) to the backend and get text back, with
//! failures classified well enough to drive bisect/retry/drop decisions.
//! This crate owns that call:
//!
//! - [`LlmService`] — enum dispatch over wire formats (no `async-trait`,
//!   no `Box<dyn ...>`); the format is chosen by [`config::ResponseFormat`].
//! - [`error::GatewayError`] / [`error::ErrorClass`] — unified errors with a
//!   size-rejected / rate-limited / transient / other classification.
//!
//! The gateway does not interpret the returned text; parsing the findings
//! payload (including truncation recovery) is the caller's job.

pub mod config;
pub mod error;
pub mod services;

use config::{GatewayConfig, ResponseFormat};
use error::Result;
use services::{ollama::OllamaService, open_ai_compat::OpenAiCompatService};

/// Backend client, dispatched by configured response format.
pub enum LlmService {
    /// OpenAI-compatible chat completions.
    OpenAiCompat(OpenAiCompatService),
    /// Local Ollama generate API.
    Ollama(OllamaService),
}

impl LlmService {
    /// Builds the service for the configured format.
    ///
    /// # Errors
    /// Propagates config validation and HTTP client construction failures.
    pub fn from_config(cfg: GatewayConfig) -> Result<Self> {
        match cfg.format {
            ResponseFormat::OpenAiCompat => {
                Ok(LlmService::OpenAiCompat(OpenAiCompatService::new(cfg)?))
            }
            ResponseFormat::Ollama => Ok(LlmService::Ollama(OllamaService::new(cfg)?)),
        }
    }

    /// Sends one prompt and returns the backend's text verbatim.
    pub async fn complete(&self, prompt: &str) -> Result<String> {
        match self {
            LlmService::OpenAiCompat(svc) => svc.complete(prompt).await,
            LlmService::Ollama(svc) => svc.complete(prompt).await,
        }
    }

    /// Best-effort warmup to avoid cold starts; errors are ignored.
    pub async fn warmup(&self) {
        let _ = self.complete("ping").await;
    }
}

// -----------------------------------------------------------------------------
// Convenience re-exports for downstream users
// -----------------------------------------------------------------------------

pub use config::{GatewayConfig as LlmGatewayConfig, ResponseFormat as LlmResponseFormat};
pub use error::{ErrorClass, GatewayError};
pub use reqwest::StatusCode;
