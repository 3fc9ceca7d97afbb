use super::support::{generate_with_retry, non_empty_str, now_millis, truncate_chars};
use crate::cache::make_cache_key;
use crate::error::ApiError;
use crate::extract::JsonBody;
use crate::models::{SummaryRequest, SummaryResponse};
use crate::providers::gemini::{Content, GenerationConfig};
use crate::providers::GenerateContentRequest;
use crate::routes::Route;
use crate::sanitizer::{filter_ai_response, sanitize_user_input};
use crate::state::SharedState;
use axum::Json;
use axum::extract::State;
use serde_json::Value;

const NO_TEXT: &str = "يرجى إدخال نص للتلخيص";
const SUMMARY_ERROR: &str = "تعذر إنشاء الملخص حالياً";

const MAX_SUMMARY_INPUT_CHARS: usize = 5000;

fn summary_prompt(text: &str) -> String {
    format!(
        "Read the following text and provide a concise, engaging summary in Arabic.\n\
         The summary should be suitable for a Saudi audience and highlight key value propositions.\n\
         Use bullet points if appropriate.\n\n\
         Text to summarize:\n{text}"
    )
}

// POST /api/ai/summary
pub async fn summary_handler(
    State(state): State<SharedState>,
    JsonBody(body): JsonBody<SummaryRequest>,
) -> Result<Json<SummaryResponse>, ApiError> {
    let gemini = state.gemini.clone().ok_or_else(ApiError::gemini_not_configured)?;

    let text = non_empty_str(&body.text).ok_or(ApiError::bad_request("NO_TEXT", NO_TEXT))?;
    let (text, _) = truncate_chars(text, MAX_SUMMARY_INPUT_CHARS);
    let text = sanitize_user_input(text);

    let cache_key = make_cache_key(Route::Summary.path(), &Value::String(text.clone()));
    if let Some(Value::String(summary)) = state.cache.get(&cache_key) {
        return Ok(Json(SummaryResponse {
            summary,
            timestamp: now_millis(),
        }));
    }

    let request = GenerateContentRequest::new(vec![Content::user_text(summary_prompt(&text))])
        .with_config(GenerationConfig::new(0.4, 1024));

    let summary = generate_with_retry(&state, gemini.as_ref(), &request)
        .await
        .map_err(|e| ApiError::upstream_with_message("SUMMARY_ERROR", SUMMARY_ERROR, e))?;
    let summary = filter_ai_response(summary.trim());

    state.cache.insert(cache_key, Value::String(summary.clone()));
    Ok(Json(SummaryResponse {
        summary,
        timestamp: now_millis(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_embeds_text_last() {
        let prompt = summary_prompt("نص الصفحة");
        assert!(prompt.starts_with("Read the following text"));
        assert!(prompt.ends_with("Text to summarize:\nنص الصفحة"));
    }
}
