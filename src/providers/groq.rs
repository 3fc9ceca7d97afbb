//! Groq client: OpenAI-compatible chat completions (plain and SSE) and
//! Whisper transcription.

use super::{ChatProvider, TokenStream, UpstreamError};
use crate::config::GroqConfig;
use async_stream::try_stream;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, trace};

const PROVIDER: &str = "groq";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatCompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl ChatCompletionRequest {
    /// System prompt, prior turns, then the new user message.
    pub fn new(
        system_prompt: &str,
        history: &[ChatMessage],
        user_message: impl Into<String>,
        temperature: f64,
        max_tokens: u32,
    ) -> Self {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(system_prompt));
        messages.extend(history.iter().cloned());
        messages.push(ChatMessage::user(user_message));
        Self {
            messages,
            temperature,
            max_tokens,
        }
    }
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    #[serde(flatten)]
    request: &'a ChatCompletionRequest,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    message: Option<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Audio file sent to the transcription endpoint.
#[derive(Debug, Clone)]
pub struct AudioInput {
    pub bytes: Bytes,
    pub file_name: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Token(String),
    Done,
}

/// Incremental decoder for `data:` lines of an OpenAI-style event stream.
/// Bytes are held until a full line arrives, so multi-byte characters split
/// across chunks survive intact.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            if let Some(event) = parse_sse_line(String::from_utf8_lossy(&line).trim()) {
                events.push(event);
            }
        }
        events
    }
}

fn parse_sse_line(line: &str) -> Option<SseEvent> {
    let payload = line.strip_prefix("data:")?.trim_start();
    if payload == "[DONE]" {
        return Some(SseEvent::Done);
    }
    // keep-alives and malformed chunks are skipped
    let parsed: Value = serde_json::from_str(payload).ok()?;
    let delta = parsed.pointer("/choices/0/delta/content")?.as_str()?;
    (!delta.is_empty()).then(|| SseEvent::Token(delta.to_string()))
}

#[derive(Debug, Clone)]
pub struct GroqClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
    transcription_endpoint: String,
    transcription_model: String,
}

impl GroqClient {
    /// `None` when no usable API key is configured.
    pub fn from_config(client: reqwest::Client, config: &GroqConfig) -> Option<Self> {
        let api_key = config.configured_key()?.to_string();
        Some(Self {
            client,
            api_key,
            model: config.model.clone(),
            endpoint: config.endpoint.clone(),
            transcription_endpoint: config.transcription_endpoint.clone(),
            transcription_model: config.transcription_model.clone(),
        })
    }

    async fn send(&self, request: &ChatCompletionRequest, stream: bool) -> Result<reqwest::Response, UpstreamError> {
        debug!(provider = PROVIDER, model = %self.model, stream, "Sending chat completion request");

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&WireRequest {
                model: &self.model,
                request,
                stream,
            })
            .send()
            .await
            .map_err(|e| {
                error!(provider = PROVIDER, error = %e, "Groq request failed");
                UpstreamError::from_reqwest(PROVIDER, e)
            })?;

        ensure_success(response).await
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, UpstreamError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    error!(provider = PROVIDER, status = status.as_u16(), "Groq API error");
    Err(UpstreamError::Status {
        provider: PROVIDER,
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl ChatProvider for GroqClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &ChatCompletionRequest) -> Result<String, UpstreamError> {
        let body = self
            .send(request, false)
            .await?
            .text()
            .await
            .map_err(|e| UpstreamError::from_reqwest(PROVIDER, e))?;
        trace!(body = %body, "Received Groq response");

        let parsed: CompletionResponse = serde_json::from_str(&body)
            .map_err(|e| UpstreamError::invalid_response(PROVIDER, e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .map(|message| message.content.trim().to_string())
            .ok_or_else(|| UpstreamError::invalid_response(PROVIDER, "response has no choices"))
    }

    async fn stream(&self, request: &ChatCompletionRequest) -> Result<TokenStream, UpstreamError> {
        let response = self.send(request, true).await?;

        let stream = try_stream! {
            let mut bytes = response.bytes_stream();
            let mut decoder = SseDecoder::default();

            while let Some(chunk) = bytes.next().await {
                let chunk = chunk.map_err(|e| UpstreamError::from_reqwest(PROVIDER, e))?;
                for event in decoder.push(&chunk) {
                    match event {
                        SseEvent::Token(token) => yield token,
                        SseEvent::Done => return,
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }

    async fn transcribe(&self, audio: AudioInput) -> Result<String, UpstreamError> {
        debug!(
            provider = PROVIDER,
            model = %self.transcription_model,
            bytes = audio.bytes.len(),
            "Sending transcription request"
        );

        let file = Part::stream(reqwest::Body::from(audio.bytes))
            .file_name(audio.file_name)
            .mime_str(&audio.mime_type)
            .map_err(|e| UpstreamError::from_reqwest(PROVIDER, e))?;
        let form = Form::new()
            .part("file", file)
            .text("model", self.transcription_model.clone())
            .text("response_format", "json");

        let response = self
            .client
            .post(&self.transcription_endpoint)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| UpstreamError::from_reqwest(PROVIDER, e))?;

        let parsed: TranscriptionResponse = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(|e| UpstreamError::invalid_response(PROVIDER, e.to_string()))?;
        Ok(parsed.text.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> GroqClient {
        let config = GroqConfig {
            api_key: Some("gsk-test".into()),
            model: "llama-test".into(),
            endpoint: format!("{}/openai/v1/chat/completions", server.uri()),
            transcription_endpoint: format!("{}/openai/v1/audio/transcriptions", server.uri()),
            transcription_model: "whisper-test".into(),
        };
        GroqClient::from_config(reqwest::Client::new(), &config).unwrap()
    }

    fn request() -> ChatCompletionRequest {
        ChatCompletionRequest::new("system", &[ChatMessage::assistant("earlier")], "hi", 0.2, 700)
    }

    #[test]
    fn test_message_order() {
        let roles: Vec<String> = request().messages.into_iter().map(|m| m.role).collect();
        assert_eq!(roles, ["system", "assistant", "user"]);
    }

    #[test]
    fn test_decoder_handles_split_utf8_and_done() {
        let mut decoder = SseDecoder::default();
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"مرحبا\"}}]}\n\n".as_bytes();
        // split inside a two-byte Arabic character
        let cut = line.iter().position(|b| *b >= 0x80).unwrap() + 1;

        assert!(decoder.push(&line[..cut]).is_empty());
        assert_eq!(decoder.push(&line[cut..]), vec![SseEvent::Token("مرحبا".into())]);
        assert_eq!(decoder.push(b": keep-alive\ndata: [DONE]\n"), vec![SseEvent::Done]);
    }

    #[test]
    fn test_decoder_skips_empty_and_malformed() {
        let mut decoder = SseDecoder::default();
        let events = decoder.push(b"data: {\"choices\":[{\"delta\":{}}]}\ndata: not json\ndata:\n");
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_complete_sends_model_and_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/openai/v1/chat/completions"))
            .and(header("authorization", "Bearer gsk-test"))
            .and(body_partial_json(json!({"model": "llama-test", "stream": false, "max_tokens": 700})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "  {\"a\":1}  "}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        assert_eq!(client(&server).complete(&request()).await.unwrap(), "{\"a\":1}");
    }

    #[tokio::test]
    async fn test_complete_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let error = client(&server).complete(&request()).await.unwrap_err();
        assert!(matches!(error, UpstreamError::Status { status: 429, .. }));
    }

    #[tokio::test]
    async fn test_stream_yields_tokens() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"أ\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ب\"}}]}\n\n",
            "data: [DONE]\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n\n",
        );
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let tokens: Vec<String> = client(&server)
            .stream(&request())
            .await
            .unwrap()
            .map(|token| token.unwrap())
            .collect()
            .await;
        assert_eq!(tokens, ["أ", "ب"]);
    }

    #[tokio::test]
    async fn test_transcribe_multipart() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/openai/v1/audio/transcriptions"))
            .and(header("authorization", "Bearer gsk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"text": " نص الصوت "})))
            .expect(1)
            .mount(&server)
            .await;

        let audio = AudioInput {
            bytes: Bytes::from_static(b"RIFF....WAVE"),
            file_name: "note.wav".into(),
            mime_type: "audio/wav".into(),
        };
        assert_eq!(client(&server).transcribe(audio).await.unwrap(), "نص الصوت");
    }
}
