//! BrightAI gateway: an Arabic-localized HTTP front for the Gemini and Groq
//! integrations, with per-client rate limiting, retry with backoff, input
//! sanitization and uniform JSON errors.

pub mod cache;
pub mod classifier;
pub mod config;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod providers;
pub mod rate_limit;
pub mod retry;
pub mod routes;
pub mod sanitizer;
pub mod session;
pub mod state;
pub mod telemetry;

pub use config::{Args, GatewayConfig};
pub use error::ApiError;
pub use routes::build_router;
pub use state::{AppState, SharedState};
