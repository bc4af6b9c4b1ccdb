//! LLM client module for MentorSTEM+
//!
//! Provides completion requests against the configured backend and the
//! stateful chat sessions built on top of them.

use std::sync::Arc;

use tracing::debug;

pub mod client;
mod error;
mod gemini;
mod session;
mod types;

pub use client::LlmClient;
pub use error::LlmError;
pub use gemini::GeminiClient;
pub use session::ChatSession;
pub use types::{CompletionRequest, CompletionResponse, Message, Role, StopReason, StreamChunk, TokenUsage};

use crate::config::LlmConfig;

/// Create an LLM client based on the provider specified in config
///
/// Only "gemini" is supported.
pub fn create_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>, LlmError> {
    debug!(provider = %config.provider, model = %config.model, "create_client: called");
    match config.provider.as_str() {
        "gemini" => {
            debug!("create_client: creating Gemini client");
            Ok(Arc::new(GeminiClient::from_config(config)?))
        }
        other => {
            debug!(provider = %other, "create_client: unknown provider");
            Err(LlmError::UnknownProvider(other.to_string()))
        }
    }
}
