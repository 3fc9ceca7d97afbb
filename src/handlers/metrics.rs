use crate::error::ApiError;
use crate::metrics;
use axum::http::header;
use axum::response::IntoResponse;

pub async fn metrics_handler() -> Result<impl IntoResponse, ApiError> {
    let body = metrics::render().map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body))
}
