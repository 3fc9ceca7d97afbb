use crate::error::{ApiError, ErrorDetails};
use crate::metrics::{RATE_LIMITED_TOTAL, REQUEST_LATENCY, REQUEST_TOTAL};
use crate::rate_limit::{RateLimitDecision, client_identity};
use crate::routes::Route;
use crate::state::SharedState;
use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde_json::Value;
use std::net::SocketAddr;
use std::time::Instant;
use tracing::warn;

// Paths outside the route table share one rate limit bucket
pub const UNMATCHED_ENDPOINT: &str = "unmatched";

const MAX_ERROR_BODY: usize = 64 * 1024;

fn route_label(path: &str) -> &'static str {
    Route::from_path(path).map_or(UNMATCHED_ENDPOINT, Route::path)
}

/// Answers every preflight with 204 and stamps the CORS headers on all
/// responses.
pub async fn cors(request: Request, next: Next) -> Response {
    let mut response = if request.method() == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(request).await
    };

    let headers = response.headers_mut();
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
    response
}

fn set_rate_limit_headers(headers: &mut HeaderMap, limit: u32, remaining: u32) {
    headers.insert("x-ratelimit-limit", HeaderValue::from(limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(remaining));
}

/// Counts the request against its (client, endpoint) window once the body
/// has been parsed. Health and metrics are exempt.
pub async fn rate_limit(State(state): State<SharedState>, request: Request, next: Next) -> Response {
    let route = Route::from_path(request.uri().path());
    if route.is_some_and(|route| !route.is_rate_limited()) {
        return next.run(request).await;
    }

    let endpoint = route.map_or(UNMATCHED_ENDPOINT, Route::path);
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let identity = client_identity(request.headers(), peer);

    match state.rate_limiter.acquire(&identity, endpoint) {
        RateLimitDecision::Allowed { limit, remaining } => {
            let mut response = next.run(request).await;
            set_rate_limit_headers(response.headers_mut(), limit, remaining);
            response
        }
        RateLimitDecision::Exceeded { limit, retry_after } => {
            RATE_LIMITED_TOTAL.inc();
            warn!(client = %identity, endpoint, "Rate limit exceeded");

            let retry_after = retry_after.as_secs_f64().ceil().max(1.0) as u64;
            let mut response = ApiError::RateLimited { retry_after }.into_response();
            set_rate_limit_headers(response.headers_mut(), limit, 0);
            response
        }
    }
}

/// Outside production, copies the raw error text into the `details` field
/// of JSON error bodies.
pub async fn error_details(State(state): State<SharedState>, request: Request, next: Next) -> Response {
    let response = next.run(request).await;
    if !state.expose_error_details() {
        return response;
    }
    let Some(ErrorDetails(details)) = response.extensions().get::<ErrorDetails>().cloned() else {
        return response;
    };

    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_ERROR_BODY).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "Could not buffer error body");
            return ApiError::Internal(e.to_string()).into_response();
        }
    };

    let body = match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(mut object)) => {
            object.insert("details".to_string(), Value::String(details));
            parts.headers.remove(header::CONTENT_LENGTH);
            Body::from(Value::Object(object).to_string())
        }
        _ => Body::from(bytes),
    };
    Response::from_parts(parts, body)
}

// request metrics
pub async fn observe(request: Request, next: Next) -> Response {
    let label = route_label(request.uri().path());
    let start_time = Instant::now();

    let response = next.run(request).await;

    REQUEST_TOTAL.with_label_values(&[label]).inc();
    REQUEST_LATENCY
        .with_label_values(&[label])
        .observe(start_time.elapsed().as_secs_f64());
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_labels_are_bounded() {
        assert_eq!(route_label("/api/ai/chat"), "/api/ai/chat");
        assert_eq!(route_label("/wp-admin/setup.php"), UNMATCHED_ENDPOINT);
    }
}
