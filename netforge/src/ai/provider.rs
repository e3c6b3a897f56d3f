//! Translator trait
//!
//! Defines the interface every natural-language-to-circuit backend offers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::ai::AIError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One turn of the conversation sent to the translator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Common trait for all translators
#[async_trait]
pub trait Translator: Send + Sync {
    /// Provider name used in narration and logs
    fn name(&self) -> &str;

    /// Send the whole history and return the raw reply text. Transport
    /// failures are errors; a reply that is not valid circuit JSON is not.
    async fn translate(&self, history: &[ChatMessage]) -> Result<String, AIError>;
}
