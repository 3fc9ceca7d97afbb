mod health;
mod metrics;
mod support;

pub mod chat;
pub mod groq;
pub mod medical;
pub mod search;
pub mod summary;

pub use health::health_handler;
pub use metrics::metrics_handler;
pub use support::parse_json_from_text;
