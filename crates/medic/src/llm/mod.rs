//! Text-generation service used for failure classification and fix synthesis.

pub mod client;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use client::ChatCompletionsClient;

/// Errors from the text-generation service.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("LLM API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("LLM returned no content")]
    EmptyResponse,

    #[error("Failed to parse LLM response: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

pub type LlmResult<T> = Result<T, LlmError>;

/// Role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// A message sent to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// Single-shot, non-streaming text generation.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate a completion for the conversation and return its text.
    async fn generate(&self, messages: &[ChatMessage]) -> LlmResult<String>;
}
