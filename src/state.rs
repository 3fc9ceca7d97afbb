use crate::cache::ResponseCache;
use crate::config::{ConfigError, GatewayConfig};
use crate::providers::{ChatProvider, ContentProvider, GeminiClient, GroqClient};
use crate::rate_limit::RateLimiter;
use crate::retry::{LogRetries, RetryPolicy};
use crate::session::SessionStore;
use std::sync::Arc;
use tracing::warn;

pub type SharedState = Arc<AppState>;

// app's shared state
pub struct AppState {
    pub config: GatewayConfig,
    pub rate_limiter: Arc<RateLimiter>,
    pub sessions: Arc<SessionStore>,
    pub cache: ResponseCache,
    pub gemini: Option<Arc<dyn ContentProvider>>, // None when no key is configured
    pub groq: Option<Arc<dyn ChatProvider>>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("environment", &self.config.environment)
            .field("gemini", &self.gemini.is_some())
            .field("groq", &self.groq.is_some())
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// State without providers; add them with `with_gemini` / `with_groq`.
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            rate_limiter: Arc::new(RateLimiter::new(config.rate_limits.clone())),
            sessions: Arc::new(SessionStore::default()),
            cache: ResponseCache::new(config.cache_ttl, config.cache_max_entries),
            gemini: None,
            groq: None,
            config,
        }
    }

    #[must_use]
    pub fn with_gemini(mut self, provider: Arc<dyn ContentProvider>) -> Self {
        self.gemini = Some(provider);
        self
    }

    #[must_use]
    pub fn with_groq(mut self, provider: Arc<dyn ChatProvider>) -> Self {
        self.groq = Some(provider);
        self
    }

    /// Builds the real HTTP clients for whichever providers have keys.
    pub fn from_config(config: GatewayConfig) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(config.upstream_timeout)
            .build()?;

        let gemini = GeminiClient::from_config(client.clone(), &config.gemini);
        let groq = GroqClient::from_config(client, &config.groq);
        if gemini.is_none() {
            warn!("GEMINI_API_KEY is not configured, Gemini routes will answer 503");
        }
        if groq.is_none() {
            warn!("GROQ_API_KEY is not configured, Groq routes will answer 503");
        }

        let mut state = Self::new(config);
        if let Some(gemini) = gemini {
            state = state.with_gemini(Arc::new(gemini));
        }
        if let Some(groq) = groq {
            state = state.with_groq(Arc::new(groq));
        }
        Ok(state)
    }

    pub fn into_shared(self) -> SharedState {
        Arc::new(self)
    }

    pub fn expose_error_details(&self) -> bool {
        !self.config.environment.is_production()
    }

    /// Fresh policy for one upstream call, logging retries under `upstream`.
    pub fn retry_policy(&self, upstream: &'static str) -> RetryPolicy {
        let retry = self.config.retry;
        RetryPolicy::new(retry.max_retries, retry.base_delay, retry.max_delay)
            .with_observer(LogRetries { upstream })
    }
}
