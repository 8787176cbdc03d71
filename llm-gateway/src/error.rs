//! Unified error handling for `llm-gateway`.
//!
//! This module exposes a single top-level error type [`GatewayError`] for the
//! whole library, plus [`ErrorClass`], the coarse classification consumed by
//! callers that need to decide between bisecting, retrying, and dropping a
//! request. Configuration problems live in the nested [`ConfigError`] enum.

use reqwest::StatusCode;
use thiserror::Error;

/// Unified result alias for the entire crate.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Top-level error for the `llm-gateway` crate.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Configuration/validation errors (startup/readiness).
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The backend refused the request because it exceeded its context window.
    #[error("[LLM Gateway] request rejected as too large: {snippet}")]
    SizeRejected {
        /// Short snippet of the rejection body.
        snippet: String,
    },

    /// Rate limited by the backend (HTTP 429).
    #[error("[LLM Gateway] rate limited")]
    RateLimited {
        /// Retry-After hint, when the backend provided one.
        retry_after_secs: Option<u64>,
    },

    /// Upstream returned a non-successful HTTP status not covered above.
    #[error("[LLM Gateway] HTTP {status} from {url}: {snippet}")]
    HttpStatus {
        /// Numeric HTTP status code.
        status: StatusCode,
        /// Request URL.
        url: String,
        /// Short snippet of the response body (trimmed).
        snippet: String,
    },

    /// Underlying HTTP transport error (DNS/connect/reset/timeout).
    #[error("[LLM Gateway] transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Response payload could not be decoded as expected.
    #[error("[LLM Gateway] decode error: {0}")]
    Decode(String),

    /// The backend answered with an empty choices/response field.
    #[error("[LLM Gateway] backend returned no content")]
    EmptyContent,
}

/// Coarse classification of a failed call, as seen by the batch executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Request exceeded the model context; splitting the payload may help.
    SizeRejected,
    /// Backend throttled us; retrying after a delay may help.
    RateLimited,
    /// Network/server hiccup; retrying may help.
    Transient,
    /// Anything else; retrying will not help.
    Other,
}

impl GatewayError {
    /// Maps this error onto the retry-relevant [`ErrorClass`].
    pub fn class(&self) -> ErrorClass {
        match self {
            GatewayError::SizeRejected { .. } => ErrorClass::SizeRejected,
            GatewayError::RateLimited { .. } => ErrorClass::RateLimited,
            GatewayError::Transport(e) => {
                if e.is_timeout() || e.is_connect() || e.is_request() {
                    ErrorClass::Transient
                } else {
                    ErrorClass::Other
                }
            }
            GatewayError::HttpStatus { status, .. } => {
                if status.is_server_error() || *status == StatusCode::REQUEST_TIMEOUT {
                    ErrorClass::Transient
                } else {
                    ErrorClass::Other
                }
            }
            _ => ErrorClass::Other,
        }
    }
}

/// Error enum for environment/config-driven setup.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable is missing or empty.
    #[error("[LLM Gateway] missing required environment variable: {0}")]
    MissingVar(&'static str),

    /// A number failed to parse (limits, timeouts).
    #[error("[LLM Gateway] invalid number in {var}: {reason}")]
    InvalidNumber {
        /// Variable name (e.g., `LLM_MAX_TOKENS`).
        var: &'static str,
        /// Human-readable reason (e.g., `expected u32`).
        reason: &'static str,
    },

    /// Unsupported response format in `LLM_FORMAT`.
    #[error("[LLM Gateway] unsupported response format: {0}")]
    UnsupportedFormat(String),

    /// Endpoint was empty or missing an http/https scheme.
    #[error("[LLM Gateway] invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Cues used to recognize a context-window rejection in an error body.
///
/// Providers word this differently (OpenAI: "maximum context length",
/// llama.cpp front-ends: "prompt is too long", etc.), so matching stays
/// substring-based and lowercase.
pub(crate) fn is_context_length_message(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    [
        "context length",
        "context_length",
        "maximum context",
        "too long",
        "too large",
        "token limit",
        "too many tokens",
    ]
    .iter()
    .any(|cue| lower.contains(cue))
}

/// Builds the canonical error for a non-2xx response.
///
/// Classification:
/// - 400/413 with a context-window cue → [`GatewayError::SizeRejected`]
/// - 429 → [`GatewayError::RateLimited`] (with the `Retry-After` hint, if any)
/// - everything else → [`GatewayError::HttpStatus`]
pub(crate) fn status_error(
    status: StatusCode,
    url: &str,
    body: &str,
    retry_after_secs: Option<u64>,
) -> GatewayError {
    let snippet = make_snippet(body);
    if status == StatusCode::TOO_MANY_REQUESTS {
        return GatewayError::RateLimited { retry_after_secs };
    }
    if (status == StatusCode::BAD_REQUEST || status == StatusCode::PAYLOAD_TOO_LARGE)
        && is_context_length_message(body)
    {
        return GatewayError::SizeRejected { snippet };
    }
    GatewayError::HttpStatus {
        status,
        url: url.to_string(),
        snippet,
    }
}

/// Trims a response body down to a log-friendly snippet.
pub(crate) fn make_snippet(body: &str) -> String {
    const MAX: usize = 200;
    let trimmed = body.trim();
    if trimmed.chars().count() <= MAX {
        trimmed.to_string()
    } else {
        trimmed.chars().take(MAX).collect::<String>() + "…"
    }
}
