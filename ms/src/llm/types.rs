//! LLM request and response types

use serde::{Deserialize, Serialize};
use tracing::debug;

/// A completion request: system prompt plus the conversation so far
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// System prompt that frames the whole session
    pub system_prompt: String,

    /// Conversation messages, oldest first
    pub messages: Vec<Message>,

    /// Maximum tokens to generate
    pub max_tokens: u32,
}

/// A message in the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    /// Create a user message
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
        }
    }

    /// Create an assistant message
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
        }
    }
}

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Role name on the Gemini wire
    pub fn as_gemini(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "model",
        }
    }
}

/// Response from a completion request
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// Text content (if any)
    pub content: Option<String>,

    /// Why the model stopped
    pub stop_reason: StopReason,

    /// Token usage
    pub usage: TokenUsage,
}

impl CompletionResponse {
    /// A finished text response
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            stop_reason: StopReason::EndTurn,
            usage: TokenUsage::default(),
        }
    }

    /// The text content, or an empty string
    pub fn text_or_empty(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

/// Why the model stopped generating
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    /// Blocked by a safety or recitation filter
    Blocked,
}

impl StopReason {
    /// Parse from a Gemini `finishReason`
    pub fn from_gemini(s: &str) -> Self {
        debug!(%s, "StopReason::from_gemini: called");
        match s {
            "MAX_TOKENS" => StopReason::MaxTokens,
            "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII" => StopReason::Blocked,
            _ => StopReason::EndTurn,
        }
    }
}

/// Token usage reported by the backend
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Streaming chunk delivered while a reply is generated
#[derive(Debug, Clone)]
pub enum StreamChunk {
    /// Next fragment of reply text
    TextDelta(String),

    /// Reply complete
    MessageDone { stop_reason: StopReason, usage: TokenUsage },

    /// Stream failed
    Error(String),
}
