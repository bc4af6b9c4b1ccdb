//! Failures of the text-completion service
//!
//! Every request is made once; whatever goes wrong is reported to the
//! caller, which decides what the user sees.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("API key not found. Set the {0} environment variable.")]
    MissingApiKey(String),

    #[error("Unknown LLM provider: '{0}'. Supported: gemini")]
    UnknownProvider(String),

    /// HTTP 429; `retry_after` is the server's hint, passed on untouched
    #[error("Too many requests to the model{}", wait_hint(.retry_after))]
    RateLimited { retry_after: Option<Duration> },

    /// Any other non-success status
    #[error("Model request rejected with HTTP {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("Could not reach the model: {0}")]
    Network(#[from] reqwest::Error),

    /// A well-formed reply that carries nothing to show
    #[error("The model sent no reply: {0}")]
    NoReply(String),

    #[error("Unreadable model reply: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The event stream broke after it was opened
    #[error("Reply stream interrupted: {0}")]
    StreamInterrupted(String),
}

fn wait_hint(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(wait) => format!(" (try again in {}s)", wait.as_secs()),
        None => String::new(),
    }
}

impl LlmError {
    /// Configuration problems that make the client impossible to build
    pub fn is_initialization(&self) -> bool {
        matches!(self, LlmError::MissingApiKey(_) | LlmError::UnknownProvider(_))
    }

    /// Map a non-success HTTP status and its body
    pub fn from_status(status: u16, retry_after: Option<Duration>, body: String) -> Self {
        if status == 429 {
            LlmError::RateLimited { retry_after }
        } else {
            LlmError::Rejected { status, message: body }
        }
    }
}
