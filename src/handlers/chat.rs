use super::support::generate_with_retry;
use crate::error::{ApiError, INVALID_REQUEST_MESSAGE};
use crate::extract::JsonBody;
use crate::models::{ChatRequest, ChatResponse};
use crate::providers::gemini::{Content, GenerationConfig};
use crate::providers::GenerateContentRequest;
use crate::sanitizer::{filter_ai_response, sanitize_user_input, validate_input_safety};
use crate::session::{create_session_id, is_valid_session_id};
use crate::state::SharedState;
use axum::Json;
use axum::extract::State;
use serde_json::Value;
use tracing::{info, warn};

const NO_MESSAGE: &str = "يرجى إدخال رسالة";
const MESSAGE_TOO_LONG: &str = "الرسالة طويلة جداً. الحد الأقصى هو 1000 حرف";

const SYSTEM_PROMPT: &str = "أنت مساعد ذكي لشركة BrightAI، شركة سعودية متخصصة في حلول الذكاء الاصطناعي.
- أجب دائماً باللغة العربية
- كن مهذباً ومحترفاً
- قدم معلومات دقيقة عن خدمات الشركة
- ساعد العملاء في الاستفسارات حول الذكاء الاصطناعي والأتمتة
- إذا لم تكن متأكداً من إجابة، اقترح التواصل مع فريق الدعم";

const GREETING: &str = "مرحباً! أنا مساعد BrightAI. كيف يمكنني مساعدتك اليوم؟";

// Persona priming, prior turns ({sender, text}), then the new message
fn build_contents(message: &str, history: &Value) -> Vec<Content> {
    let mut contents = vec![Content::user_text(SYSTEM_PROMPT), Content::model(GREETING)];

    let turns = history.as_array().map(Vec::as_slice).unwrap_or_default();
    for turn in turns {
        let Some(text) = turn.get("text").and_then(Value::as_str) else {
            continue;
        };
        let text = sanitize_user_input(text);
        if turn.get("sender").and_then(Value::as_str) == Some("user") {
            contents.push(Content::user_text(text));
        } else {
            contents.push(Content::model(text));
        }
    }

    contents.push(Content::user_text(message));
    contents
}

// Opaque client tokens come back unchanged; numbers are tokens too
fn echoed_session_id(requested: &Value) -> Option<Value> {
    match requested {
        Value::String(id) if is_valid_session_id(id) => Some(requested.clone()),
        Value::Number(_) => Some(requested.clone()),
        _ => None,
    }
}

// POST /api/ai/chat
pub async fn chat_handler(
    State(state): State<SharedState>,
    JsonBody(body): JsonBody<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let gemini = state.gemini.clone().ok_or_else(ApiError::gemini_not_configured)?;

    let Value::String(message) = &body.message else {
        return Err(ApiError::bad_request("INVALID_REQUEST", INVALID_REQUEST_MESSAGE));
    };
    if message.trim().is_empty() {
        return Err(ApiError::bad_request("NO_MESSAGE", NO_MESSAGE));
    }
    if message.chars().count() > state.config.max_input_length {
        return Err(ApiError::bad_request("MESSAGE_TOO_LONG", MESSAGE_TOO_LONG));
    }

    if !validate_input_safety(message) {
        warn!("Chat message contained markup, sanitizing before forwarding");
    }
    let sanitized = sanitize_user_input(message);
    let request = GenerateContentRequest::new(build_contents(&sanitized, &body.history))
        .with_config(GenerationConfig::new(0.7, 1024));

    let reply = generate_with_retry(&state, gemini.as_ref(), &request)
        .await
        .map_err(|e| ApiError::upstream("API_ERROR", e))?;

    let session_id = echoed_session_id(&body.session_id)
        .unwrap_or_else(|| Value::String(create_session_id()));
    info!(session_id = %session_id, reply_chars = reply.chars().count(), "Chat reply generated");

    Ok(Json(ChatResponse {
        reply: filter_ai_response(&reply),
        session_id,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::gemini::Part;
    use serde_json::json;

    fn texts(contents: &[Content]) -> Vec<(String, String)> {
        contents
            .iter()
            .map(|c| {
                let text = match &c.parts[0] {
                    Part::Text { text } => text.clone(),
                    Part::InlineData { .. } => String::new(),
                };
                (c.role.clone().unwrap_or_default(), text)
            })
            .collect()
    }

    #[test]
    fn test_history_maps_senders_to_roles() {
        let history = json!([
            {"sender": "user", "text": "ما خدماتكم؟"},
            {"sender": "bot", "text": "نقدم حلول <b>AI</b>"},
            {"sender": "user"},
            "garbage"
        ]);
        let turns = texts(&build_contents("شكراً", &history));

        assert_eq!(turns.len(), 5);
        assert_eq!(turns[0], ("user".into(), SYSTEM_PROMPT.into()));
        assert_eq!(turns[1], ("model".into(), GREETING.into()));
        assert_eq!(turns[2], ("user".into(), "ما خدماتكم؟".into()));
        assert_eq!(turns[3], ("model".into(), "نقدم حلول &lt;b&gt;AI&lt;&#x2F;b&gt;".into()));
        assert_eq!(turns[4], ("user".into(), "شكراً".into()));
    }

    #[test]
    fn test_session_ids_are_echoed_verbatim() {
        assert_eq!(echoed_session_id(&json!("a.b:c")), Some(json!("a.b:c")));
        assert_eq!(echoed_session_id(&json!(" padded ")), Some(json!(" padded ")));
        assert_eq!(echoed_session_id(&json!(42)), Some(json!(42)));
        assert_eq!(echoed_session_id(&json!("")), None);
        assert_eq!(echoed_session_id(&json!({"id": 1})), None);
        assert_eq!(echoed_session_id(&Value::Null), None);
    }

    #[test]
    fn test_missing_history_is_fine() {
        assert_eq!(build_contents("hi", &Value::Null).len(), 3);
    }
}
