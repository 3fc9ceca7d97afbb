use crate::error::ApiError;
use crate::metrics::UPSTREAM_FAILURES;
use crate::providers::{ChatCompletionRequest, ChatProvider, ContentProvider, GenerateContentRequest, UpstreamError};
use crate::state::AppState;
use axum::http::StatusCode;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;

pub const INVALID_JSON_OUTPUT_MESSAGE: &str = "تعذر تحليل النتائج بصيغة JSON";

pub async fn generate_with_retry(
    state: &AppState,
    provider: &dyn ContentProvider,
    request: &GenerateContentRequest,
) -> Result<String, UpstreamError> {
    state
        .retry_policy("gemini")
        .execute(|| provider.generate(request))
        .await
        .inspect_err(|_| UPSTREAM_FAILURES.with_label_values(&["gemini"]).inc())
}

pub async fn complete_with_retry(
    state: &AppState,
    provider: &dyn ChatProvider,
    request: &ChatCompletionRequest,
) -> Result<String, UpstreamError> {
    state
        .retry_policy("groq")
        .execute(|| provider.complete(request))
        .await
        .inspect_err(|_| UPSTREAM_FAILURES.with_label_values(&["groq"]).inc())
}

/// Model output as JSON: the whole text, else the outermost `{...}`, else
/// the outermost `[...]`.
pub fn parse_json_from_text(text: &str) -> Option<Value> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_str(text) {
        return Some(value);
    }
    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (text.find(open), text.rfind(close)) {
            if end > start {
                // an object slice that fails to parse ends the search
                return serde_json::from_str(&text[start..=end]).ok();
            }
        }
    }
    None
}

pub fn invalid_json_output() -> ApiError {
    ApiError::with_status(
        StatusCode::INTERNAL_SERVER_ERROR,
        "INVALID_JSON_OUTPUT",
        INVALID_JSON_OUTPUT_MESSAGE,
    )
}

/// Drops a `data:<mime>;base64,` prefix if present.
pub fn strip_data_prefix(data: &str) -> &str {
    data.rsplit_once(',').map_or(data, |(_, payload)| payload).trim()
}

/// Bytes `data` decodes to, without decoding it.
pub fn decoded_len(data: &str) -> usize {
    let padding = data.bytes().rev().take_while(|b| *b == b'=').count();
    (data.len() * 3 / 4).saturating_sub(padding)
}

pub fn decode_base64(data: &str) -> Option<Vec<u8>> {
    STANDARD.decode(data).ok()
}

/// First `max` characters of `text` and whether anything was cut.
pub fn truncate_chars(text: &str, max: usize) -> (&str, bool) {
    match text.char_indices().nth(max) {
        Some((index, _)) => (&text[..index], true),
        None => (text, false),
    }
}

/// Non-empty string field, or `None`.
pub fn non_empty_str(value: &Value) -> Option<&str> {
    value.as_str().filter(|s| !s.trim().is_empty())
}

/// Compact JSON of `value` capped at `max` characters, for prompt context.
pub fn prompt_json(value: &Value, max: usize) -> String {
    if value.is_null() {
        return "[]".to_string();
    }
    let json = value.to_string();
    truncate_chars(&json, max).0.to_string()
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
