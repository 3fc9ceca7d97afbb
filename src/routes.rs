//! Route table and router assembly.

use crate::config::{BodyTier, ConfigError, GatewayConfig};
use crate::error::ApiError;
use crate::extract;
use crate::handlers;
use crate::middleware;
use crate::state::SharedState;
use axum::Router;
use axum::http::Method;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use std::any::Any;
use std::collections::HashSet;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Health,
    Metrics,
    Chat,
    Search,
    Medical,
    Summary,
    GroqStream,
    GroqOcr,
    GroqExtractText,
    GroqTranscribe,
    GroqMedicalAgent,
    GroqFaq,
    GroqMedicalArchive,
}

impl Route {
    pub const ALL: [Route; 13] = [
        Route::Health,
        Route::Metrics,
        Route::Chat,
        Route::Search,
        Route::Medical,
        Route::Summary,
        Route::GroqStream,
        Route::GroqOcr,
        Route::GroqExtractText,
        Route::GroqTranscribe,
        Route::GroqMedicalAgent,
        Route::GroqFaq,
        Route::GroqMedicalArchive,
    ];

    pub fn path(self) -> &'static str {
        match self {
            Route::Health => "/api/health",
            Route::Metrics => "/metrics",
            Route::Chat => "/api/ai/chat",
            Route::Search => "/api/ai/search",
            Route::Medical => "/api/ai/medical",
            Route::Summary => "/api/ai/summary",
            Route::GroqStream => "/api/groq/stream",
            Route::GroqOcr => "/api/groq/ocr",
            Route::GroqExtractText => "/api/groq/extract-text",
            Route::GroqTranscribe => "/api/groq/transcribe",
            Route::GroqMedicalAgent => "/api/groq/medical-agent",
            Route::GroqFaq => "/api/groq/faq",
            Route::GroqMedicalArchive => "/api/groq/medical-archive",
        }
    }

    pub fn method(self) -> Method {
        match self {
            Route::Health | Route::Metrics => Method::GET,
            _ => Method::POST,
        }
    }

    pub fn body_tier(self) -> BodyTier {
        match self {
            Route::Medical
            | Route::GroqOcr
            | Route::GroqExtractText
            | Route::GroqMedicalAgent
            | Route::GroqMedicalArchive => BodyTier::Ocr,
            Route::GroqTranscribe => BodyTier::Upload,
            _ => BodyTier::Standard,
        }
    }

    pub fn is_rate_limited(self) -> bool {
        !matches!(self, Route::Health | Route::Metrics)
    }

    pub fn from_path(path: &str) -> Option<Route> {
        Route::ALL.into_iter().find(|route| route.path() == path)
    }
}

/// Startup check: paths are unique and every rate limit override names a
/// route that exists.
pub fn validate_route_table(config: &GatewayConfig) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for route in Route::ALL {
        if !seen.insert(route.path()) {
            return Err(ConfigError::DuplicateRoute(route.path().to_string()));
        }
    }

    for endpoint in config.rate_limits.overridden_endpoints() {
        match Route::from_path(endpoint) {
            Some(route) if route.is_rate_limited() => {}
            _ => return Err(ConfigError::UnknownRoute(endpoint.to_string())),
        }
    }
    Ok(())
}

fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .cloned()
        .or_else(|| panic.downcast_ref::<&str>().map(|s| s.to_string()))
        .unwrap_or_else(|| "handler panicked".to_string());
    ApiError::Internal(detail).into_response()
}

async fn not_found() -> ApiError {
    ApiError::NotFound
}

/// Create the gateway router with every route and the middleware stack.
///
/// Outermost first: tracing, CORS (answers preflights), error details,
/// panic guard, request metrics, body parsing, rate limiting.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route(Route::Health.path(), get(handlers::health_handler))
        .route(Route::Metrics.path(), get(handlers::metrics_handler))
        .route(Route::Chat.path(), post(handlers::chat::chat_handler))
        .route(Route::Search.path(), post(handlers::search::search_handler))
        .route(Route::Medical.path(), post(handlers::medical::medical_handler))
        .route(Route::Summary.path(), post(handlers::summary::summary_handler))
        .route(Route::GroqStream.path(), post(handlers::groq::stream_handler))
        .route(Route::GroqOcr.path(), post(handlers::groq::ocr_handler))
        .route(Route::GroqExtractText.path(), post(handlers::groq::extract_text_handler))
        .route(Route::GroqTranscribe.path(), post(handlers::groq::transcribe_handler))
        .route(Route::GroqMedicalAgent.path(), post(handlers::groq::medical_agent_handler))
        .route(Route::GroqFaq.path(), post(handlers::groq::faq_handler))
        .route(Route::GroqMedicalArchive.path(), post(handlers::groq::medical_archive_handler))
        .fallback(not_found)
        .method_not_allowed_fallback(not_found)
        .layer(axum::middleware::from_fn_with_state(state.clone(), middleware::rate_limit))
        .layer(axum::middleware::from_fn_with_state(state.clone(), extract::parse_body))
        .layer(axum::middleware::from_fn(middleware::observe))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(axum::middleware::from_fn_with_state(state.clone(), middleware::error_details))
        .layer(axum::middleware::from_fn(middleware::cors))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LimitConfig;

    #[test]
    fn test_paths_round_trip() {
        for route in Route::ALL {
            assert_eq!(Route::from_path(route.path()), Some(route));
        }
        assert_eq!(Route::from_path("/api/ai/chat/"), None);
    }

    #[test]
    fn test_body_tiers() {
        assert_eq!(Route::Chat.body_tier(), BodyTier::Standard);
        assert_eq!(Route::Medical.body_tier(), BodyTier::Ocr);
        assert_eq!(Route::GroqMedicalArchive.body_tier(), BodyTier::Ocr);
        assert_eq!(Route::GroqTranscribe.body_tier(), BodyTier::Upload);
    }

    #[test]
    fn test_default_table_is_valid() {
        validate_route_table(&GatewayConfig::default()).unwrap();
    }

    #[test]
    fn test_override_for_unknown_route_rejected() {
        let mut config = GatewayConfig::default();
        config.rate_limits = config
            .rate_limits
            .with_override("/api/ai/chatt", LimitConfig::per_minute(5));
        assert!(matches!(
            validate_route_table(&config),
            Err(ConfigError::UnknownRoute(path)) if path == "/api/ai/chatt"
        ));
    }

    #[test]
    fn test_override_for_health_rejected() {
        let mut config = GatewayConfig::default();
        config.rate_limits = config
            .rate_limits
            .with_override("/api/health", LimitConfig::per_minute(5));
        assert!(validate_route_table(&config).is_err());
    }
}
