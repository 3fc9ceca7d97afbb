//! Upstream model APIs: Gemini `generateContent` and Groq's OpenAI-style
//! chat, streaming and transcription endpoints.
//!
//! Handlers talk to the traits here so tests can swap in scripted providers.

pub mod gemini;
pub mod groq;

use crate::classifier::{ErrorSignal, NetworkErrorCode};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::error::Error as _;
use std::io;

pub use gemini::{GeminiClient, GenerateContentRequest};
pub use groq::{AudioInput, ChatCompletionRequest, ChatMessage, GroqClient};

pub type TokenStream = BoxStream<'static, Result<String, UpstreamError>>;

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("{provider} API error: {status}")]
    Status {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("{provider} network error ({code}): {message}")]
    Network {
        provider: &'static str,
        code: NetworkErrorCode,
        message: String,
    },

    #[error("{provider} request failed: {message}")]
    Transport {
        provider: &'static str,
        message: String,
    },

    #[error("Invalid {provider} response: {message}")]
    InvalidResponse {
        provider: &'static str,
        message: String,
    },

    #[error("{0} is not configured")]
    NotConfigured(&'static str),
}

impl UpstreamError {
    pub fn from_reqwest(provider: &'static str, error: reqwest::Error) -> Self {
        if let Some(status) = error.status() {
            return Self::Status {
                provider,
                status: status.as_u16(),
                body: String::new(),
            };
        }
        match network_code(&error) {
            Some(code) => Self::Network {
                provider,
                code,
                message: error.to_string(),
            },
            None => Self::Transport {
                provider,
                message: error.to_string(),
            },
        }
    }

    pub fn invalid_response(provider: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            provider,
            message: message.into(),
        }
    }

    pub fn provider(&self) -> &'static str {
        match self {
            Self::Status { provider, .. }
            | Self::Network { provider, .. }
            | Self::Transport { provider, .. }
            | Self::InvalidResponse { provider, .. }
            | Self::NotConfigured(provider) => provider,
        }
    }
}

impl ErrorSignal for UpstreamError {
    fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::NotConfigured(_) => Some(503),
            _ => None,
        }
    }

    fn network_code(&self) -> Option<NetworkErrorCode> {
        match self {
            Self::Network { code, .. } => Some(*code),
            _ => None,
        }
    }
}

// Walks the source chain down to the io::Error (or hyper's dns message)
fn network_code(error: &reqwest::Error) -> Option<NetworkErrorCode> {
    if error.is_timeout() {
        return Some(NetworkErrorCode::TimedOut);
    }

    let mut source = error.source();
    while let Some(cause) = source {
        if let Some(io_error) = cause.downcast_ref::<io::Error>() {
            let code = match io_error.kind() {
                io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => {
                    Some(NetworkErrorCode::ConnectionReset)
                }
                io::ErrorKind::ConnectionRefused => Some(NetworkErrorCode::ConnectionRefused),
                io::ErrorKind::TimedOut => Some(NetworkErrorCode::TimedOut),
                io::ErrorKind::NetworkUnreachable | io::ErrorKind::HostUnreachable => {
                    Some(NetworkErrorCode::NetworkUnreachable)
                }
                _ => None,
            };
            if code.is_some() {
                return code;
            }
        }
        if cause.to_string().contains("dns error") {
            return Some(NetworkErrorCode::DnsFailure);
        }
        source = cause.source();
    }

    error.is_connect().then_some(NetworkErrorCode::ConnectionRefused)
}

/// Multimodal single-shot generation (Gemini).
#[async_trait]
pub trait ContentProvider: Send + Sync {
    fn model(&self) -> &str;

    /// Returns the concatenated text of the first candidate.
    async fn generate(&self, request: &GenerateContentRequest) -> Result<String, UpstreamError>;
}

/// OpenAI-style chat completions (Groq).
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn model(&self) -> &str;

    async fn complete(&self, request: &ChatCompletionRequest) -> Result<String, UpstreamError>;

    /// Yields content deltas as they arrive. Errors before the first byte are
    /// returned directly so the caller can retry them.
    async fn stream(&self, request: &ChatCompletionRequest) -> Result<TokenStream, UpstreamError>;

    async fn transcribe(&self, audio: AudioInput) -> Result<String, UpstreamError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::is_transient_error;

    #[test]
    fn test_status_errors_classify_by_code() {
        let error = UpstreamError::Status {
            provider: "gemini",
            status: 503,
            body: "overloaded".into(),
        };
        assert_eq!(error.status_code(), Some(503));
        assert!(is_transient_error(&error, error.status_code()));
        assert_eq!(error.to_string(), "gemini API error: 503");
    }

    #[test]
    fn test_network_errors_are_transient() {
        let error = UpstreamError::Network {
            provider: "groq",
            code: NetworkErrorCode::ConnectionReset,
            message: "connection reset by peer".into(),
        };
        assert!(is_transient_error(&error, None));
    }

    #[test]
    fn test_invalid_response_is_permanent() {
        let error = UpstreamError::invalid_response("gemini", "no candidates");
        assert!(!is_transient_error(&error, error.status_code()));
    }

    #[tokio::test]
    async fn test_refused_connection_maps_to_network_code() {
        // nothing listens on port 9 of localhost in the test environment
        let error = reqwest::Client::new()
            .get("http://127.0.0.1:9/")
            .send()
            .await
            .unwrap_err();

        let mapped = UpstreamError::from_reqwest("groq", error);
        assert!(matches!(mapped, UpstreamError::Network { .. }), "{mapped:?}");
        assert!(mapped.network_code().is_some());
    }
}
