//! LlmClient trait definition

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{CompletionRequest, CompletionResponse, LlmError, StreamChunk};

/// Text-completion backend
///
/// Each call is independent: the caller sends the whole conversation it
/// wants the model to see. Conversation state lives in `ChatSession`.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a completion request and wait for the full reply
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Streaming completion
    ///
    /// Sends `TextDelta` chunks to the channel in arrival order, then
    /// `MessageDone`. Returns the final complete response.
    async fn stream(
        &self,
        request: CompletionRequest,
        chunk_tx: mpsc::Sender<StreamChunk>,
    ) -> Result<CompletionResponse, LlmError>;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tracing::debug;

    /// Characters per streamed fragment
    const FRAGMENT_CHARS: usize = 7;

    /// Scripted LLM client for unit tests
    ///
    /// Replies are served in order; once they run out every call fails,
    /// which doubles as request-failure injection.
    pub struct MockLlmClient {
        responses: Vec<CompletionResponse>,
        call_count: AtomicUsize,
        delay: Option<Duration>,
        requests: Mutex<Vec<CompletionRequest>>,
    }

    impl MockLlmClient {
        pub fn new(responses: Vec<CompletionResponse>) -> Self {
            debug!(response_count = %responses.len(), "MockLlmClient::new: called");
            Self {
                responses,
                call_count: AtomicUsize::new(0),
                delay: None,
                requests: Mutex::new(Vec::new()),
            }
        }

        /// Client replying with the given texts in order
        pub fn texts(texts: &[&str]) -> Self {
            Self::new(texts.iter().map(|t| CompletionResponse::text(*t)).collect())
        }

        /// Hold every call for `delay` before answering
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }

        /// Every request received so far
        pub fn requests(&self) -> Vec<CompletionRequest> {
            self.requests.lock().map(|r| r.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl LlmClient for MockLlmClient {
        async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            debug!("MockLlmClient::complete: called");
            if let Ok(mut requests) = self.requests.lock() {
                requests.push(request);
            }
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let idx = self.call_count.fetch_add(1, Ordering::SeqCst);
            self.responses.get(idx).cloned().ok_or_else(|| {
                debug!(%idx, "MockLlmClient::complete: no more mock responses");
                LlmError::NoReply("No more mock responses".to_string())
            })
        }

        async fn stream(
            &self,
            request: CompletionRequest,
            chunk_tx: mpsc::Sender<StreamChunk>,
        ) -> Result<CompletionResponse, LlmError> {
            debug!("MockLlmClient::stream: called");
            let response = self.complete(request).await?;
            let chars: Vec<char> = response.text_or_empty().chars().collect();
            for fragment in chars.chunks(FRAGMENT_CHARS) {
                let _ = chunk_tx.send(StreamChunk::TextDelta(fragment.iter().collect())).await;
            }
            let _ = chunk_tx
                .send(StreamChunk::MessageDone {
                    stop_reason: response.stop_reason.clone(),
                    usage: response.usage.clone(),
                })
                .await;
            Ok(response)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn request() -> CompletionRequest {
            CompletionRequest {
                system_prompt: "Test".to_string(),
                messages: vec![],
                max_tokens: 1000,
            }
        }

        #[tokio::test]
        async fn test_mock_client_returns_responses() {
            let client = MockLlmClient::texts(&["Response 1", "Response 2"]);

            let resp1 = client.complete(request()).await.unwrap();
            assert_eq!(resp1.content, Some("Response 1".to_string()));

            let resp2 = client.complete(request()).await.unwrap();
            assert_eq!(resp2.content, Some("Response 2".to_string()));

            assert_eq!(client.call_count(), 2);
            assert_eq!(client.requests().len(), 2);
        }

        #[tokio::test]
        async fn test_mock_client_errors_when_exhausted() {
            let client = MockLlmClient::new(vec![]);
            assert!(client.complete(request()).await.is_err());
        }

        #[tokio::test]
        async fn test_mock_client_streams_fragments() {
            let client = MockLlmClient::texts(&["una respuesta larga"]);
            let (tx, mut rx) = mpsc::channel(64);
            client.stream(request(), tx).await.unwrap();

            let mut text = String::new();
            let mut fragments = 0;
            while let Some(chunk) = rx.recv().await {
                if let StreamChunk::TextDelta(t) = chunk {
                    text.push_str(&t);
                    fragments += 1;
                }
            }
            assert_eq!(text, "una respuesta larga");
            assert!(fragments > 1);
        }
    }
}
