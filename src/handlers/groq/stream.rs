use super::DEMO_SYSTEM_PROMPT;
use crate::classifier::ErrorSignal;
use crate::error::ApiError;
use crate::extract::JsonBody;
use crate::metrics::UPSTREAM_FAILURES;
use crate::models::StreamRequest;
use crate::providers::{ChatCompletionRequest, ChatMessage, UpstreamError};
use crate::sanitizer::{StreamFilter, sanitize_user_input};
use crate::state::SharedState;
use async_stream::stream;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt};
use serde_json::{Value, json};
use std::convert::Infallible;
use tracing::{debug, warn};

const INVALID_MESSAGE: &str = "يرجى إدخال نص صحيح للديمو";
const MESSAGE_TOO_LONG: &str = "النص طويل جداً للديمو";
const STREAM_UNAVAILABLE: &str = "الخدمة غير متاحة حالياً";
const STREAM_FAILED: &str = "حدث خطأ أثناء البث";

const DEFAULT_OUTPUT_TYPE: &str = "ملخص تنفيذي";

fn demo_user_message(message: &str, output_type: Option<&str>) -> String {
    let output_type = output_type
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_OUTPUT_TYPE);
    format!("نوع المخرجات المطلوب: {output_type}\nالطلب: {message}")
}

fn data_event(value: Value) -> Event {
    Event::default().data(value.to_string())
}

fn stream_error_message(error: &UpstreamError) -> &'static str {
    if error.status_code() == Some(503) {
        STREAM_UNAVAILABLE
    } else {
        STREAM_FAILED
    }
}

fn stream_error_event(error: &UpstreamError) -> Event {
    data_event(json!({ "error": stream_error_message(error) }))
}

// POST /api/groq/stream
//
// Emits `{sessionId}` first, then `{token}` events as filtered content
// becomes safe to send, and a final `[DONE]`. Once the response has started, failures arrive as a
// single `{error}` event.
pub async fn stream_handler(
    State(state): State<SharedState>,
    JsonBody(body): JsonBody<StreamRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let groq = state.groq.clone().ok_or_else(ApiError::groq_not_configured)?;

    let message = match &body.message {
        Value::String(message) if !message.trim().is_empty() => message,
        _ => return Err(ApiError::bad_request("INVALID_MESSAGE", INVALID_MESSAGE)),
    };
    if message.chars().count() > state.config.max_input_length {
        return Err(ApiError::bad_request("MESSAGE_TOO_LONG", MESSAGE_TOO_LONG));
    }

    let session = state.sessions.get_or_create(body.session_id.as_deref());
    let user_message = demo_user_message(&sanitize_user_input(message), body.output_type.as_deref());
    let request = ChatCompletionRequest::new(DEMO_SYSTEM_PROMPT, &session.history, user_message.clone(), 0.6, 900);
    state.sessions.append(&session.id, ChatMessage::user(user_message));

    let events = stream! {
        yield Ok(data_event(json!({ "sessionId": session.id })));

        let opened = state
            .retry_policy("groq")
            .execute(|| groq.stream(&request))
            .await;
        let mut tokens = match opened {
            Ok(tokens) => tokens,
            Err(e) => {
                UPSTREAM_FAILURES.with_label_values(&["groq"]).inc();
                warn!(session_id = %session.id, error = %e, "Groq stream could not start");
                yield Ok(stream_error_event(&e));
                return;
            }
        };

        let mut assistant_text = String::new();
        let mut filter = StreamFilter::new();
        while let Some(token) = tokens.next().await {
            match token {
                Ok(token) => {
                    assistant_text.push_str(&token);
                    let safe = filter.push(&token);
                    if !safe.is_empty() {
                        yield Ok(data_event(json!({ "token": safe })));
                    }
                }
                Err(e) => {
                    UPSTREAM_FAILURES.with_label_values(&["groq"]).inc();
                    warn!(session_id = %session.id, error = %e, "Groq stream failed mid-response");
                    let rest = filter.finish();
                    if !rest.is_empty() {
                        yield Ok(data_event(json!({ "token": rest })));
                    }
                    yield Ok(stream_error_event(&e));
                    return;
                }
            }
        }
        let rest = filter.finish();
        if !rest.is_empty() {
            yield Ok(data_event(json!({ "token": rest })));
        }

        let assistant_text = assistant_text.trim();
        if !assistant_text.is_empty() {
            state.sessions.append(&session.id, ChatMessage::assistant(assistant_text));
        }
        debug!(session_id = %session.id, chars = assistant_text.chars().count(), "Groq stream finished");
        yield Ok(Event::default().data("[DONE]"));
    };

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
