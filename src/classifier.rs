//! Error taxonomy: which failures are worth retrying and which Arabic message
//! a browser user gets to see for them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// HTTP statuses that signal a temporary upstream condition.
pub const TRANSIENT_STATUS_CODES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Socket-level failure kinds, named after the errno values the upstream
/// documentation uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkErrorCode {
    ConnectionReset,
    ConnectionRefused,
    TimedOut,
    DnsFailure,
    NetworkUnreachable,
}

impl NetworkErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionReset => "ECONNRESET",
            Self::ConnectionRefused => "ECONNREFUSED",
            Self::TimedOut => "ETIMEDOUT",
            Self::DnsFailure => "ENOTFOUND",
            Self::NetworkUnreachable => "ENETUNREACH",
        }
    }
}

impl fmt::Display for NetworkErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the classifier can learn from an error value.
pub trait ErrorSignal: fmt::Display {
    fn status_code(&self) -> Option<u16> {
        None
    }

    fn network_code(&self) -> Option<NetworkErrorCode> {
        None
    }
}

impl ErrorSignal for str {}
impl ErrorSignal for String {}

pub fn is_transient_status(status: u16) -> bool {
    TRANSIENT_STATUS_CODES.contains(&status)
}

/// True when retrying `error` has a reasonable chance of succeeding.
pub fn is_transient_error<E: ErrorSignal + ?Sized>(error: &E, status_code: Option<u16>) -> bool {
    if status_code.is_some_and(is_transient_status) {
        return true;
    }
    if error.network_code().is_some() {
        return true;
    }

    let message = error.to_string().to_lowercase();
    ["timeout", "network", "econnreset", "econnrefused", "fetch failed"]
        .iter()
        .any(|pattern| message.contains(pattern))
}

/// User-facing messages, all in Arabic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorMessage {
    NetworkError,
    TimeoutError,
    ApiUnavailable,
    RateLimitExceeded,
    InvalidRequest,
    InvalidInput,
    Unauthorized,
    Forbidden,
    NotFound,
    InternalError,
    ServiceError,
    UnknownError,
}

impl ErrorMessage {
    pub fn text(self) -> &'static str {
        match self {
            Self::NetworkError => "خطأ في الاتصال بالشبكة. يرجى المحاولة مرة أخرى",
            Self::TimeoutError => "انتهت مهلة الطلب. يرجى المحاولة مرة أخرى",
            Self::ApiUnavailable => "الخدمة غير متاحة مؤقتاً. يرجى المحاولة لاحقاً",
            Self::RateLimitExceeded => "تم تجاوز الحد المسموح من الطلبات. يرجى الانتظار قليلاً",
            Self::InvalidRequest => "طلب غير صالح",
            Self::InvalidInput => "البيانات المدخلة غير صحيحة",
            Self::Unauthorized => "غير مصرح بالوصول",
            Self::Forbidden => "الوصول محظور",
            Self::NotFound => "الصفحة غير موجودة",
            Self::InternalError => "حدث خطأ داخلي في الخادم",
            Self::ServiceError => "خطأ في الخدمة",
            Self::UnknownError => "حدث خطأ غير متوقع. يرجى المحاولة مرة أخرى",
        }
    }

    pub fn for_status(status: u16) -> Option<Self> {
        match status {
            400 => Some(Self::InvalidRequest),
            401 => Some(Self::Unauthorized),
            403 => Some(Self::Forbidden),
            404 => Some(Self::NotFound),
            408 => Some(Self::TimeoutError),
            429 => Some(Self::RateLimitExceeded),
            500 | 502 | 503 | 504 => Some(Self::ApiUnavailable),
            _ => None,
        }
    }
}

/// Picks the message for an error: status code first, then the network
/// failure kind, then keywords in the error text.
pub fn classify_message<E: ErrorSignal + ?Sized>(error: &E, status_code: Option<u16>) -> ErrorMessage {
    if let Some(message) = status_code.and_then(ErrorMessage::for_status) {
        return message;
    }
    if error.network_code().is_some() {
        return ErrorMessage::NetworkError;
    }

    let text = error.to_string().to_lowercase();
    if text.contains("timeout") {
        ErrorMessage::TimeoutError
    } else if text.contains("network") || text.contains("fetch failed") {
        ErrorMessage::NetworkError
    } else if text.contains("rate limit") {
        ErrorMessage::RateLimitExceeded
    } else {
        ErrorMessage::UnknownError
    }
}

pub fn arabic_error_message<E: ErrorSignal + ?Sized>(error: &E, status_code: Option<u16>) -> &'static str {
    classify_message(error, status_code).text()
}

/// Body of every error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, error_code: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            error_code: error_code.into(),
            retry_after: None,
            details: None,
        }
    }
}

/// Builds the error body for `error`; the raw error text is attached only
/// when `expose_details` is set (non-production).
pub fn create_error_response<E: ErrorSignal + ?Sized>(
    error: &E,
    status_code: u16,
    error_code: &str,
    expose_details: bool,
) -> ErrorResponse {
    let mut response = ErrorResponse::new(arabic_error_message(error, Some(status_code)), error_code);
    if expose_details {
        response.details = Some(error.to_string());
    }
    response
}
