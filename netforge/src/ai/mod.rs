//! External translator boundary
//!
//! The pipeline only needs "given a conversation, return text that should
//! contain circuit JSON". [`Translator`] is that seam; [`OpenAiClient`] talks
//! to any OpenAI-compatible chat endpoint (OpenAI, OpenRouter, a local
//! Ollama server) and [`ScriptedTranslator`] replays canned responses for
//! offline runs and tests.

pub mod openai;
pub mod prompts;
pub mod provider;
pub mod replay;

use thiserror::Error;

// Re-export for convenience
pub use openai::OpenAiClient;
pub use prompts::*;
pub use provider::{ChatMessage, Role, Translator};
pub use replay::ScriptedTranslator;

#[derive(Debug, Error)]
pub enum AIError {
    #[error("API request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },
    #[error("Failed to parse response: {0}")]
    ParseError(String),
    #[error("Rate limited. Retry after {retry_after} seconds")]
    RateLimited { retry_after: u64 },
    #[error("Missing API key or no provider available")]
    MissingApiKey,
    #[error("Invalid response format: {0}")]
    InvalidResponse(String),
}
