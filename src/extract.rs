//! JSON body extractor with per-route size ceilings.

use crate::error::ApiError;
use crate::routes::Route;
use crate::state::SharedState;
use axum::body::Body;
use axum::extract::{FromRequest, Request, State};
use axum::http::Method;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// A POST body already read and parsed by [`parse_body`].
#[derive(Debug, Clone)]
pub struct ParsedBody(pub Value);

fn body_limit(state: &SharedState, path: &str) -> usize {
    let tier = Route::from_path(path).map(Route::body_tier).unwrap_or_default();
    state.config.body_limits.for_tier(tier)
}

/// Reads and parses every POST body before the rate limiter sees the
/// request, so oversized or malformed bodies are rejected without spending
/// quota. The parsed value travels to [`JsonBody`] as a request extension.
pub async fn parse_body(State(state): State<SharedState>, request: Request, next: Next) -> Response {
    if request.method() != Method::POST {
        return next.run(request).await;
    }

    let limit = body_limit(&state, request.uri().path());
    let (mut parts, body) = request.into_parts();
    match read_json(body, limit).await {
        Ok(value) => {
            parts.extensions.insert(ParsedBody(value));
            next.run(Request::from_parts(parts, Body::empty())).await
        }
        Err(e) => e.into_response(),
    }
}

/// Reads the body through a byte ceiling chosen by the route's tier, then
/// parses it in two steps so malformed JSON (`INVALID_JSON`) and well-formed
/// JSON of the wrong shape (`INVALID_REQUEST`) are told apart. An empty body
/// is treated as `{}`. Bodies already parsed by [`parse_body`] are reused.
#[derive(Debug, Clone)]
pub struct JsonBody<T>(pub T);

impl<T> FromRequest<SharedState> for JsonBody<T>
where
    T: DeserializeOwned,
{
    type Rejection = ApiError;

    async fn from_request(mut req: Request, state: &SharedState) -> Result<Self, Self::Rejection> {
        let value = match req.extensions_mut().remove::<ParsedBody>() {
            Some(ParsedBody(value)) => value,
            None => {
                let limit = body_limit(state, req.uri().path());
                read_json(req.into_body(), limit).await?
            }
        };
        serde_json::from_value(value)
            .map(JsonBody)
            .map_err(|e| ApiError::InvalidRequest(e.to_string()))
    }
}

/// Collects at most `limit` bytes and parses them as JSON.
pub async fn read_json(body: Body, limit: usize) -> Result<Value, ApiError> {
    let bytes = Limited::new(body, limit)
        .collect()
        .await
        .map_err(|e| {
            if e.downcast_ref::<LengthLimitError>().is_some() {
                ApiError::BodyTooLarge { limit }
            } else {
                ApiError::Internal(format!("failed to read request body: {e}"))
            }
        })?
        .to_bytes();

    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_slice(&bytes).map_err(|e| ApiError::InvalidJson(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_empty_body_is_empty_object() {
        assert_eq!(read_json(Body::empty(), 16).await.unwrap(), json!({}));
        assert_eq!(read_json(Body::from("  \n"), 16).await.unwrap(), json!({}));
    }

    #[tokio::test]
    async fn test_oversized_body_rejected_before_parsing() {
        let body = Body::from(format!("{{\"message\":\"{}\"", "x".repeat(64)));
        assert!(matches!(
            read_json(body, 32).await,
            Err(ApiError::BodyTooLarge { limit: 32 })
        ));
    }

    #[tokio::test]
    async fn test_malformed_json() {
        assert!(matches!(
            read_json(Body::from("{\"message\":"), 1024).await,
            Err(ApiError::InvalidJson(_))
        ));
    }

    #[tokio::test]
    async fn test_body_exactly_at_limit_accepted() {
        let body = "{\"a\":1}";
        assert_eq!(read_json(Body::from(body), body.len()).await.unwrap(), json!({"a": 1}));
    }
}
