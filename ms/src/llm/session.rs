//! Stateful chat on top of a stateless client
//!
//! The session owns the system prompt and the running history. A turn is
//! appended to the history only after the backend answers, so a failed
//! send leaves the conversation exactly as it was.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::debug;

use super::{CompletionRequest, LlmClient, LlmError, Message, StreamChunk};

/// Buffered fragments between the client and the caller's callback
const STREAM_BUFFER: usize = 64;

pub struct ChatSession {
    client: Arc<dyn LlmClient>,
    system_prompt: String,
    max_tokens: u32,
    history: Mutex<Vec<Message>>,
}

impl ChatSession {
    pub fn new(client: Arc<dyn LlmClient>, system_prompt: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            client,
            system_prompt: system_prompt.into(),
            max_tokens,
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Snapshot of the conversation so far
    pub fn history(&self) -> Vec<Message> {
        self.lock().clone()
    }

    /// Forget every turn
    pub fn reset(&self) {
        debug!("ChatSession::reset: called");
        self.lock().clear();
    }

    /// Send one user message and wait for the whole reply
    pub async fn send(&self, text: impl Into<String>) -> Result<String, LlmError> {
        let message = Message::user(text);
        debug!(chars = %message.content.len(), "ChatSession::send: called");
        let request = self.request_with(&message);
        let response = self.client.complete(request).await?;
        let reply = response.text_or_empty().to_string();
        self.record(message, &reply);
        Ok(reply)
    }

    /// Send one user message, handing each reply fragment to `on_fragment`
    /// as it arrives; returns the full reply
    pub async fn send_stream<F>(&self, text: impl Into<String>, mut on_fragment: F) -> Result<String, LlmError>
    where
        F: FnMut(&str),
    {
        let message = Message::user(text);
        debug!(chars = %message.content.len(), "ChatSession::send_stream: called");
        let request = self.request_with(&message);
        let (tx, mut rx) = mpsc::channel(STREAM_BUFFER);

        let forward = async {
            while let Some(chunk) = rx.recv().await {
                match chunk {
                    StreamChunk::TextDelta(fragment) => on_fragment(&fragment),
                    StreamChunk::MessageDone { .. } => {}
                    StreamChunk::Error(e) => debug!(error = %e, "ChatSession::send_stream: stream error"),
                }
            }
        };
        let (result, ()) = tokio::join!(self.client.stream(request, tx), forward);

        let reply = result?.text_or_empty().to_string();
        self.record(message, &reply);
        Ok(reply)
    }

    fn request_with(&self, message: &Message) -> CompletionRequest {
        let mut messages = self.history();
        messages.push(message.clone());
        CompletionRequest {
            system_prompt: self.system_prompt.clone(),
            messages,
            max_tokens: self.max_tokens,
        }
    }

    fn record(&self, message: Message, reply: &str) {
        let mut history = self.lock();
        history.push(message);
        history.push(Message::assistant(reply));
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Message>> {
        // A poisoned history is still a valid list of turns
        self.history.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Role;
    use crate::llm::client::mock::MockLlmClient;

    #[tokio::test]
    async fn test_send_records_both_turns() {
        let mock = Arc::new(MockLlmClient::texts(&["respuesta"]));
        let session = ChatSession::new(mock.clone(), "sistema", 1024);

        let reply = session.send("pregunta").await.unwrap();
        assert_eq!(reply, "respuesta");

        let history = session.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0], Message::user("pregunta"));
        assert_eq!(history[1].role, Role::Assistant);

        let sent = &mock.requests()[0];
        assert_eq!(sent.system_prompt, "sistema");
        assert_eq!(sent.max_tokens, 1024);
    }

    #[tokio::test]
    async fn test_later_turns_carry_history() {
        let mock = Arc::new(MockLlmClient::texts(&["uno", "dos"]));
        let session = ChatSession::new(mock.clone(), "", 100);
        session.send("a").await.unwrap();
        session.send("b").await.unwrap();

        let second = &mock.requests()[1];
        let contents: Vec<&str> = second.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["a", "uno", "b"]);
    }

    #[tokio::test]
    async fn test_failed_send_leaves_history_untouched() {
        let mock = Arc::new(MockLlmClient::texts(&["uno"]));
        let session = ChatSession::new(mock, "", 100);
        session.send("a").await.unwrap();
        assert!(session.send("b").await.is_err());
        assert_eq!(session.history().len(), 2);
    }

    #[tokio::test]
    async fn test_send_stream_delivers_fragments_in_order() {
        let mock = Arc::new(MockLlmClient::texts(&["Hola, soy InspiraTEC."]));
        let session = ChatSession::new(mock, "", 100);

        let mut fragments = Vec::new();
        let reply = session
            .send_stream("hola", |f| fragments.push(f.to_string()))
            .await
            .unwrap();

        assert!(fragments.len() > 1);
        assert_eq!(fragments.concat(), reply);
        assert_eq!(reply, "Hola, soy InspiraTEC.");
        assert_eq!(session.history().len(), 2);
    }

    #[tokio::test]
    async fn test_reset_clears_history() {
        let mock = Arc::new(MockLlmClient::texts(&["x"]));
        let session = ChatSession::new(mock, "", 100);
        session.send("a").await.unwrap();
        session.reset();
        assert!(session.history().is_empty());
    }
}
