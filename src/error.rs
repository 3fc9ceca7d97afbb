//! Errors at the HTTP boundary. Every failure a handler, extractor or
//! middleware can produce ends up here and leaves as an [`ErrorResponse`].

use crate::classifier::{ErrorResponse, ErrorSignal, arabic_error_message};
use crate::providers::UpstreamError;
use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use tracing::{debug, error, warn};

pub const INVALID_REQUEST_MESSAGE: &str = "طلب غير صالح";
pub const BODY_TOO_LARGE_MESSAGE: &str = "الطلب كبير جداً";
pub const RATE_LIMIT_MESSAGE: &str = "عذراً، لقد تجاوزت الحد المسموح من الطلبات. يرجى المحاولة بعد دقيقة.";
pub const NOT_FOUND_MESSAGE: &str = "الصفحة غير موجودة";
pub const SERVER_ERROR_MESSAGE: &str = "حدث خطأ في الخادم";
pub const AI_UNAVAILABLE_MESSAGE: &str = "خدمة الذكاء الاصطناعي غير متاحة حالياً";
pub const GROQ_UNAVAILABLE_MESSAGE: &str = "خدمة Groq غير متاحة حالياً";

/// Raw error text attached to error responses; the error-details middleware
/// copies it into the body outside production.
#[derive(Debug, Clone)]
pub struct ErrorDetails(pub String);

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Validation failure or bad model output with a route specific code.
    #[error("{code}: {message}")]
    Request {
        status: StatusCode,
        code: &'static str,
        message: &'static str,
    },

    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error("malformed JSON body: {0}")]
    InvalidJson(String),

    #[error("unexpected request body shape: {0}")]
    InvalidRequest(String),

    #[error("{code}: upstream credentials missing")]
    NotConfigured {
        code: &'static str,
        message: &'static str,
    },

    #[error("rate limit exceeded, retry after {retry_after}s")]
    RateLimited { retry_after: u64 },

    #[error("no route for request")]
    NotFound,

    /// Provider failure after retries. `message` overrides the classifier's
    /// localized text when the route has its own.
    #[error("{code}: {source}")]
    Upstream {
        code: &'static str,
        message: Option<&'static str>,
        #[source]
        source: UpstreamError,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(code: &'static str, message: &'static str) -> Self {
        Self::Request {
            status: StatusCode::BAD_REQUEST,
            code,
            message,
        }
    }

    pub fn with_status(status: StatusCode, code: &'static str, message: &'static str) -> Self {
        Self::Request { status, code, message }
    }

    pub fn gemini_not_configured() -> Self {
        Self::NotConfigured {
            code: "API_NOT_CONFIGURED",
            message: AI_UNAVAILABLE_MESSAGE,
        }
    }

    pub fn groq_not_configured() -> Self {
        Self::NotConfigured {
            code: "GROQ_NOT_CONFIGURED",
            message: GROQ_UNAVAILABLE_MESSAGE,
        }
    }

    pub fn upstream(code: &'static str, source: UpstreamError) -> Self {
        Self::Upstream {
            code,
            message: None,
            source,
        }
    }

    pub fn upstream_with_message(code: &'static str, message: &'static str, source: UpstreamError) -> Self {
        Self::Upstream {
            code,
            message: Some(message),
            source,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Request { status, .. } => *status,
            Self::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::InvalidJson(_) | Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotConfigured { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Upstream { source, .. } => source
                .status_code()
                .and_then(|status| StatusCode::from_u16(status).ok())
                .filter(|status| status.is_client_error() || status.is_server_error())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Request { code, .. } | Self::NotConfigured { code, .. } | Self::Upstream { code, .. } => *code,
            Self::BodyTooLarge { .. } => "BODY_TOO_LARGE",
            Self::InvalidJson(_) => "INVALID_JSON",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::RateLimited { .. } => "RATE_LIMIT_EXCEEDED",
            Self::NotFound => "NOT_FOUND",
            Self::Internal(_) => "SERVER_ERROR",
        }
    }

    /// Localized text shown to the user.
    pub fn message(&self) -> &'static str {
        match self {
            Self::Request { message, .. } | Self::NotConfigured { message, .. } => *message,
            Self::BodyTooLarge { .. } => BODY_TOO_LARGE_MESSAGE,
            Self::InvalidJson(_) | Self::InvalidRequest(_) => INVALID_REQUEST_MESSAGE,
            Self::RateLimited { .. } => RATE_LIMIT_MESSAGE,
            Self::NotFound => NOT_FOUND_MESSAGE,
            Self::Upstream { message: Some(message), .. } => *message,
            Self::Upstream { source, .. } => arabic_error_message(source, source.status_code()),
            Self::Internal(_) => SERVER_ERROR_MESSAGE,
        }
    }

    pub fn to_error_response(&self) -> ErrorResponse {
        let mut body = ErrorResponse::new(self.message(), self.error_code());
        if let Self::RateLimited { retry_after } = self {
            body.retry_after = Some(*retry_after);
        }
        body
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();

        if status.is_server_error() {
            error!(status = status.as_u16(), error_code = code, error = %self, "Request failed");
        } else if status == StatusCode::TOO_MANY_REQUESTS {
            warn!(error_code = code, "Request rate limited");
        } else {
            debug!(status = status.as_u16(), error_code = code, error = %self, "Request rejected");
        }

        let mut response = (status, Json(self.to_error_response())).into_response();
        if let Self::RateLimited { retry_after } = &self {
            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response.extensions_mut().insert(ErrorDetails(self.to_string()));
        response
    }
}
