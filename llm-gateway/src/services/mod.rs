//! Provider-format service implementations.

pub mod ollama;
pub mod open_ai_compat;
