//! Crate-wide error hierarchy for review-engine.
//!
//! Goals:
//! - Single root `Error` for all public functions.
//! - Unit- and batch-level failures never surface here; they degrade softly
//!   inside the executor. Only invocation-level problems become errors.
//! - No dynamic dispatch, ergonomic `?` via `From` impls.

use thiserror::Error;

/// Convenient alias for crate-wide results.
pub type EngineResult<T> = Result<T, Error>;

/// Root error type for the review-engine crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Outbound service failure (already classified by the gateway).
    #[error(transparent)]
    Service(#[from] llm_gateway::GatewayError),

    /// Model response could not be turned into findings.
    #[error(transparent)]
    Response(#[from] ResponseError),

    /// Suppression store (file I/O / JSON) failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Input validation errors (bad roots, empty paths, etc.).
    #[error("validation error: {0}")]
    Validation(String),

    /// Nothing to send: the planner produced no batches from non-empty input.
    #[error("no batches producible from {0} review units")]
    NoBatches(usize),
}

/// Model-response parsing errors.
#[derive(Debug, Error)]
pub enum ResponseError {
    /// Response was malformed and not even one complete finding object could
    /// be extracted from it.
    #[error("no extractable content in model response")]
    NoExtractableContent,
}

/// Suppression-store related errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}

// ===== Conversions for `?` ergonomics =====

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Store(StoreError::Io(e))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Store(StoreError::Serde(e))
    }
}
