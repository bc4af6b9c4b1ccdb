//! Google Gemini API client implementation
//!
//! Implements the LlmClient trait over the `generateContent` REST endpoints,
//! with `streamGenerateContent?alt=sse` for streaming replies.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use reqwest_eventsource::{Event, EventSource, retry};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{CompletionRequest, CompletionResponse, LlmClient, LlmError, Message, StopReason, StreamChunk, TokenUsage};
use crate::config::LlmConfig;

fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Gemini API client
pub struct GeminiClient {
    model: String,
    api_key: String,
    base_url: String,
    http: Client,
    max_tokens: u32,
}

impl GeminiClient {
    /// Create a new client from configuration
    ///
    /// Reads the API key from the environment variable named in config.
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        debug!(?config, "from_config: called");
        let api_key = config.api_key()?;
        let timeout = Duration::from_millis(config.timeout_ms);
        let http = Client::builder().timeout(timeout).build().map_err(LlmError::Network)?;

        Ok(Self {
            model: config.model.clone(),
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http,
            max_tokens: config.max_tokens,
        })
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/v1beta/models/{}:{}", self.base_url, self.model, method)
    }

    /// Build the request body for the Gemini API
    fn build_request_body(&self, request: &CompletionRequest) -> serde_json::Value {
        debug!(%self.model, %request.max_tokens, "build_request_body: called");
        let mut body = serde_json::json!({
            "contents": convert_messages(&request.messages),
            "generationConfig": {
                "maxOutputTokens": request.max_tokens.min(self.max_tokens),
            },
        });
        if !request.system_prompt.is_empty() {
            body["systemInstruction"] = serde_json::json!({
                "parts": [{ "text": request.system_prompt }],
            });
        }
        body
    }

    fn post(&self, url: &str, body: &serde_json::Value) -> reqwest::RequestBuilder {
        self.http
            .post(url)
            .header("x-goog-api-key", self.api_key.clone())
            .header("content-type", "application/json")
            .json(body)
    }
}

/// Convert internal messages to Gemini `contents`
fn convert_messages(messages: &[Message]) -> Vec<serde_json::Value> {
    messages
        .iter()
        .map(|msg| {
            serde_json::json!({
                "role": msg.role.as_gemini(),
                "parts": [{ "text": msg.content }],
            })
        })
        .collect()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thought: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

impl GeminiResponse {
    /// Visible text of the first candidate (thought parts skipped)
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter(|p| !p.thought)
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }

    fn finish_reason(&self) -> Option<&str> {
        self.candidates.first().and_then(|c| c.finish_reason.as_deref())
    }

    fn usage(&self) -> Option<TokenUsage> {
        self.usage_metadata.as_ref().map(|u| TokenUsage {
            input_tokens: u.prompt_token_count,
            output_tokens: u.candidates_token_count,
        })
    }

    fn block_reason(&self) -> Option<&str> {
        self.prompt_feedback.as_ref().and_then(|f| f.block_reason.as_deref())
    }
}

/// Parse a single-shot Gemini reply
fn parse_response(api_response: GeminiResponse) -> Result<CompletionResponse, LlmError> {
    debug!(candidates = %api_response.candidates.len(), "parse_response: called");
    if api_response.candidates.is_empty() {
        let reason = api_response.block_reason().unwrap_or("no candidates");
        return Err(LlmError::NoReply(format!("Gemini returned no candidates ({})", reason)));
    }
    let text = api_response.text();
    Ok(CompletionResponse {
        content: if text.is_empty() { None } else { Some(text) },
        stop_reason: api_response
            .finish_reason()
            .map_or(StopReason::EndTurn, StopReason::from_gemini),
        usage: api_response.usage().unwrap_or_default(),
    })
}

async fn status_error(status: u16, response: reqwest::Response) -> LlmError {
    let wait = retry_after(response.headers());
    let body = response.text().await.unwrap_or_default();
    LlmError::from_status(status, wait, body)
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        debug!(%self.model, messages = %request.messages.len(), "complete: called");
        let url = self.endpoint("generateContent");
        let body = self.build_request_body(&request);

        let response = self.post(&url, &body).send().await.map_err(|e| {
            warn!(error = %e, "complete: network error");
            LlmError::Network(e)
        })?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            warn!(%status, "complete: API error");
            return Err(status_error(status, response).await);
        }

        debug!("complete: success");
        let api_response: GeminiResponse = response.json().await?;
        parse_response(api_response)
    }

    async fn stream(
        &self,
        request: CompletionRequest,
        chunk_tx: mpsc::Sender<StreamChunk>,
    ) -> Result<CompletionResponse, LlmError> {
        debug!(%self.model, messages = %request.messages.len(), "stream: called");
        let url = format!("{}?alt=sse", self.endpoint("streamGenerateContent"));
        let body = self.build_request_body(&request);

        let mut es = EventSource::new(self.post(&url, &body))
            .map_err(|e| LlmError::StreamInterrupted(format!("Failed to create EventSource: {}", e)))?;
        es.set_retry_policy(Box::new(retry::Never));

        let mut full_content = String::new();
        let mut stop_reason = StopReason::EndTurn;
        let mut usage = TokenUsage::default();
        let mut failure = None;

        while let Some(event) = es.next().await {
            match event {
                Ok(Event::Open) => {
                    debug!("stream: Event::Open");
                }
                Ok(Event::Message(msg)) => {
                    let data: GeminiResponse = match serde_json::from_str(&msg.data) {
                        Ok(data) => data,
                        Err(e) => {
                            failure = Some(LlmError::Malformed(e));
                            break;
                        }
                    };
                    let text = data.text();
                    if !text.is_empty() {
                        full_content.push_str(&text);
                        let _ = chunk_tx.send(StreamChunk::TextDelta(text)).await;
                    }
                    if let Some(reason) = data.finish_reason() {
                        debug!(%reason, "stream: finish reason");
                        stop_reason = StopReason::from_gemini(reason);
                    }
                    if let Some(u) = data.usage() {
                        usage = u;
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => {
                    debug!("stream: ended");
                    break;
                }
                Err(reqwest_eventsource::Error::InvalidStatusCode(status, response)) => {
                    warn!(%status, "stream: invalid status");
                    failure = Some(status_error(status.as_u16(), response).await);
                    break;
                }
                Err(reqwest_eventsource::Error::Transport(e)) => {
                    warn!(error = %e, "stream: transport error");
                    failure = Some(LlmError::Network(e));
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "stream: event error");
                    failure = Some(LlmError::StreamInterrupted(e.to_string()));
                    break;
                }
            }
        }
        es.close();

        if let Some(err) = failure {
            let _ = chunk_tx.send(StreamChunk::Error(err.to_string())).await;
            return Err(err);
        }

        debug!(chars = %full_content.len(), "stream: complete");
        let _ = chunk_tx
            .send(StreamChunk::MessageDone {
                stop_reason: stop_reason.clone(),
                usage: usage.clone(),
            })
            .await;
        Ok(CompletionResponse {
            content: if full_content.is_empty() { None } else { Some(full_content) },
            stop_reason,
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> GeminiClient {
        GeminiClient {
            model: "gemini-2.5-flash".to_string(),
            api_key: "test-key".to_string(),
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            http: Client::new(),
            max_tokens: 8192,
        }
    }

    #[test]
    fn test_endpoint() {
        assert_eq!(
            client().endpoint("generateContent"),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent"
        );
    }

    #[test]
    fn test_build_request_body() {
        let request = CompletionRequest {
            system_prompt: "Eres MentorSTEM+".to_string(),
            messages: vec![Message::user("hola"), Message::assistant("¿qué tal?")],
            max_tokens: 100_000,
        };
        let body = client().build_request_body(&request);
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "Eres MentorSTEM+");
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(body["contents"][1]["parts"][0]["text"], "¿qué tal?");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 8192);
    }

    #[test]
    fn test_build_request_body_without_system_prompt() {
        let request = CompletionRequest {
            system_prompt: String::new(),
            messages: vec![Message::user("hola")],
            max_tokens: 10,
        };
        let body = client().build_request_body(&request);
        assert!(body.get("systemInstruction").is_none());
    }

    #[test]
    fn test_parse_response_joins_visible_parts() {
        let json = r#"{
            "candidates": [{
                "content": {"role": "model", "parts": [
                    {"text": "pensando", "thought": true},
                    {"text": "Hola "},
                    {"text": "mundo"}
                ]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 12, "candidatesTokenCount": 3}
        }"#;
        let parsed: GeminiResponse = serde_json::from_str(json).unwrap();
        let response = parse_response(parsed).unwrap();
        assert_eq!(response.content.as_deref(), Some("Hola mundo"));
        assert_eq!(response.stop_reason, StopReason::EndTurn);
        assert_eq!(response.usage.input_tokens, 12);
        assert_eq!(response.usage.output_tokens, 3);
    }

    #[test]
    fn test_parse_response_blocked_prompt() {
        let json = r#"{"promptFeedback": {"blockReason": "SAFETY"}}"#;
        let parsed: GeminiResponse = serde_json::from_str(json).unwrap();
        let err = parse_response(parsed).unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
    }

    #[test]
    fn test_stream_event_without_text() {
        let json = r#"{"candidates": [{"finishReason": "MAX_TOKENS"}]}"#;
        let parsed: GeminiResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.text(), "");
        assert_eq!(parsed.finish_reason(), Some("MAX_TOKENS"));
    }

    #[test]
    fn test_retry_after_header() {
        let mut headers = reqwest::header::HeaderMap::new();
        assert_eq!(retry_after(&headers), None);
        headers.insert("retry-after", "17".parse().unwrap());
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(17)));
        headers.insert("retry-after", "Wed, 21 Oct 2026 07:28:00 GMT".parse().unwrap());
        assert_eq!(retry_after(&headers), None);
    }

    #[tokio::test]
    async fn test_complete_fails_on_first_attempt() {
        // Nothing listens on the discard port, so the only attempt fails fast
        let mut gemini = client();
        gemini.base_url = "http://127.0.0.1:9".to_string();
        let request = CompletionRequest {
            system_prompt: String::new(),
            messages: vec![Message::user("hola")],
            max_tokens: 10,
        };
        let started = std::time::Instant::now();
        let err = gemini.complete(request).await.unwrap_err();
        assert!(matches!(err, LlmError::Network(_)));
        assert!(started.elapsed() < Duration::from_millis(900));
    }
}
