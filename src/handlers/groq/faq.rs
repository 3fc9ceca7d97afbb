use super::FAQ_SYSTEM_PROMPT;
use crate::error::ApiError;
use crate::extract::JsonBody;
use crate::handlers::support::{complete_with_retry, non_empty_str, parse_json_from_text, truncate_chars};
use crate::models::{FaqItem, FaqRequest, FaqResponse};
use crate::providers::ChatCompletionRequest;
use crate::sanitizer::{filter_ai_response, sanitize_user_input};
use crate::state::SharedState;
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde_json::Value;

const MISSING_CONTEXT: &str = "يرجى توفير سياق التقرير";
const INVALID_FAQ_OUTPUT: &str = "تعذر توليد FAQ بصيغة صحيحة";
const FAQ_GENERATION_ERROR: &str = "حدث خطأ أثناء توليد FAQ";

const MAX_CONTEXT_CHARS: usize = 4000;
const MAX_FAQS: usize = 5;

/// Keeps entries whose question and answer are both strings, at most five.
fn collect_faqs(items: &[Value]) -> Vec<FaqItem> {
    items
        .iter()
        .filter_map(|item| {
            let question = item.get("question")?.as_str()?;
            let answer = item.get("answer")?.as_str()?;
            Some(FaqItem {
                question: filter_ai_response(question),
                answer: filter_ai_response(answer),
            })
        })
        .take(MAX_FAQS)
        .collect()
}

// POST /api/groq/faq
pub async fn faq_handler(
    State(state): State<SharedState>,
    JsonBody(body): JsonBody<FaqRequest>,
) -> Result<Json<FaqResponse>, ApiError> {
    let groq = state.groq.clone().ok_or_else(ApiError::groq_not_configured)?;

    let context = non_empty_str(&body.context)
        .ok_or(ApiError::bad_request("MISSING_CONTEXT", MISSING_CONTEXT))?;
    let sanitized = sanitize_user_input(context);
    let (context, _) = truncate_chars(&sanitized, MAX_CONTEXT_CHARS);

    let request = ChatCompletionRequest::new(
        FAQ_SYSTEM_PROMPT,
        &[],
        format!("السياق:\n{context}\n\nأعد الأسئلة والأجوبة بصيغة JSON فقط."),
        0.3,
        700,
    );
    let output = complete_with_retry(&state, groq.as_ref(), &request)
        .await
        .map_err(|e| ApiError::upstream_with_message("FAQ_GENERATION_ERROR", FAQ_GENERATION_ERROR, e))?;

    let Some(Value::Array(items)) = parse_json_from_text(&output) else {
        return Err(ApiError::with_status(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INVALID_FAQ_OUTPUT",
            INVALID_FAQ_OUTPUT,
        ));
    };

    Ok(Json(FaqResponse {
        faqs: collect_faqs(&items),
    }))
}
