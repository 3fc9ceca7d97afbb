use clap::Parser;
use std::collections::HashMap;
use std::time::Duration;

// Keys shipped in sample .env files; treated the same as a missing key
const PLACEHOLDER_KEY: &str = "YOUR_KEY_HERE";

// CLI argument structure, every flag can also come from the environment
#[derive(Parser, Debug, Clone)]
#[command(name = "brightai-gateway")]
#[command(about = "Rate-limited gateway in front of the Gemini and Groq APIs")]
pub struct Args {
    // Port to run the server on
    #[arg(short, long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    // "production" hides error details from responses
    #[arg(long, env = "APP_ENV")]
    pub app_env: Option<String>,

    /// Fallback for `APP_ENV` in deployments that only set NODE_ENV.
    #[arg(long, env = "NODE_ENV", hide = true)]
    pub node_env: Option<String>,

    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub gemini_api_key: Option<String>,

    #[arg(long, env = "GEMINI_MODEL", default_value = "gemini-2.5-flash")]
    pub gemini_model: String,

    #[arg(
        long,
        env = "GEMINI_ENDPOINT",
        default_value = "https://generativelanguage.googleapis.com/v1beta/models"
    )]
    pub gemini_endpoint: String,

    #[arg(long, env = "GROQ_API_KEY", hide_env_values = true)]
    pub groq_api_key: Option<String>,

    #[arg(long, env = "GROQ_MODEL", default_value = "llama3-70b-8192")]
    pub groq_model: String,

    #[arg(
        long,
        env = "GROQ_ENDPOINT",
        default_value = "https://api.groq.com/openai/v1/chat/completions"
    )]
    pub groq_endpoint: String,

    #[arg(
        long,
        env = "GROQ_TRANSCRIPTION_ENDPOINT",
        default_value = "https://api.groq.com/openai/v1/audio/transcriptions"
    )]
    pub groq_transcription_endpoint: String,

    #[arg(long, env = "GROQ_TRANSCRIPTION_MODEL", default_value = "whisper-large-v3")]
    pub groq_transcription_model: String,

    // Rate limit max requests per window (default for every endpoint)
    #[arg(long, env = "RATE_LIMIT_REQUESTS_PER_MINUTE", default_value_t = 30)]
    pub rate_limit: u32,

    // Rate limit window in seconds
    #[arg(long, env = "RATE_LIMIT_WINDOW_SECS", default_value_t = 60)]
    pub rate_window: u64,

    // Stricter ceiling for the conversational endpoint
    #[arg(long, env = "CHAT_RATE_LIMIT", default_value_t = 10)]
    pub chat_rate_limit: u32,

    // Extra per-endpoint limits: "/api/groq/faq=5" or "/api/groq/faq=5/120"
    #[arg(long, env = "RATE_LIMIT_OVERRIDES", value_delimiter = ',')]
    pub rate_limit_overrides: Vec<String>,

    #[arg(long, env = "MAX_BODY_BYTES", default_value_t = 10 * 1024)]
    pub max_body_bytes: usize,

    #[arg(long, env = "OCR_MAX_BODY_BYTES", default_value_t = 6 * 1024 * 1024)]
    pub ocr_max_body_bytes: usize,

    #[arg(long, env = "UPLOAD_MAX_BODY_BYTES", default_value_t = 25 * 1024 * 1024)]
    pub upload_max_body_bytes: usize,

    // Max characters accepted in chat messages and search queries
    #[arg(long, env = "MAX_INPUT_LENGTH", default_value_t = 1000)]
    pub max_input_length: usize,

    #[arg(long, env = "UPSTREAM_TIMEOUT_SECS", default_value_t = 30)]
    pub upstream_timeout: u64,

    #[arg(long, env = "UPSTREAM_MAX_RETRIES", default_value_t = 3)]
    pub max_retries: u32,

    #[arg(long, env = "RETRY_BASE_DELAY_MS", default_value_t = 1000)]
    pub retry_base_delay_ms: u64,

    #[arg(long, env = "RETRY_MAX_DELAY_MS", default_value_t = 10_000)]
    pub retry_max_delay_ms: u64,

    // Response cache TTL in seconds (search and summary)
    #[arg(short, long, env = "CACHE_TTL_SECS", default_value_t = 300)]
    pub cache_ttl: u64,

    #[arg(long, env = "CACHE_MAX_ENTRIES", default_value_t = 1000)]
    pub cache_max_entries: usize,

    // "pretty" or "json"
    #[arg(long, env = "LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid rate limit override {0:?}, expected PATH=COUNT or PATH=COUNT/SECONDS")]
    InvalidOverride(String),

    #[error("rate limit override names unknown route {0}")]
    UnknownRoute(String),

    #[error("route {0} is registered twice")]
    DuplicateRoute(String),

    #[error("rate limit for {0} must allow at least one request per non-empty window")]
    ZeroLimit(String),

    #[error("failed to build upstream HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            _ => Self::Development,
        }
    }

    pub fn is_production(self) -> bool {
        self == Self::Production
    }
}

/// Requests allowed per fixed window for one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitConfig {
    pub requests_per_window: u32,
    pub window: Duration,
}

impl LimitConfig {
    pub fn per_minute(requests: u32) -> Self {
        Self {
            requests_per_window: requests,
            window: Duration::from_secs(60),
        }
    }
}

/// Immutable endpoint path -> limit table with a process-wide default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointLimits {
    default: LimitConfig,
    overrides: HashMap<String, LimitConfig>,
}

impl EndpointLimits {
    pub fn new(default: LimitConfig) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_override(mut self, endpoint: impl Into<String>, limit: LimitConfig) -> Self {
        self.overrides.insert(endpoint.into(), limit);
        self
    }

    pub fn default_limit(&self) -> LimitConfig {
        self.default
    }

    pub fn for_endpoint(&self, endpoint: &str) -> LimitConfig {
        self.overrides.get(endpoint).copied().unwrap_or(self.default)
    }

    pub fn overridden_endpoints(&self) -> impl Iterator<Item = &str> {
        self.overrides.keys().map(String::as_str)
    }

    // The sweep runs at the smallest window so no entry outlives its window by
    // more than one sweep period and none is removed while still live.
    pub fn sweep_interval(&self) -> Duration {
        self.overrides
            .values()
            .map(|limit| limit.window)
            .chain(std::iter::once(self.default.window))
            .min()
            .unwrap_or(self.default.window)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let all = std::iter::once(("default", &self.default))
            .chain(self.overrides.iter().map(|(k, v)| (k.as_str(), v)));
        for (endpoint, limit) in all {
            if limit.requests_per_window == 0 || limit.window.is_zero() {
                return Err(ConfigError::ZeroLimit(endpoint.to_string()));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BodyTier {
    #[default]
    Standard,
    Ocr,
    Upload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BodyLimits {
    pub standard: usize,
    pub ocr: usize,
    pub upload: usize,
}

impl BodyLimits {
    pub fn for_tier(&self, tier: BodyTier) -> usize {
        match tier {
            BodyTier::Standard => self.standard,
            BodyTier::Ocr => self.ocr,
            BodyTier::Upload => self.upload,
        }
    }
}

impl Default for BodyLimits {
    fn default() -> Self {
        Self {
            standard: 10 * 1024,
            ocr: 6 * 1024 * 1024,
            upload: 25 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeminiConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub endpoint: String,
}

impl GeminiConfig {
    pub fn configured_key(&self) -> Option<&str> {
        usable_key(self.api_key.as_deref())
    }
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gemini-2.5-flash".to_string(),
            endpoint: "https://generativelanguage.googleapis.com/v1beta/models".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroqConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub endpoint: String,
    pub transcription_endpoint: String,
    pub transcription_model: String,
}

impl GroqConfig {
    pub fn configured_key(&self) -> Option<&str> {
        usable_key(self.api_key.as_deref())
    }
}

impl Default for GroqConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "llama3-70b-8192".to_string(),
            endpoint: "https://api.groq.com/openai/v1/chat/completions".to_string(),
            transcription_endpoint: "https://api.groq.com/openai/v1/audio/transcriptions"
                .to_string(),
            transcription_model: "whisper-large-v3".to_string(),
        }
    }
}

fn usable_key(key: Option<&str>) -> Option<&str> {
    key.map(str::trim)
        .filter(|key| !key.is_empty() && *key != PLACEHOLDER_KEY)
}

// Backoff parameters used to build a fresh RetryPolicy per upstream call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
        }
    }
}

/// Everything the gateway reads at runtime. Built once in `main` (or by a
/// test) and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub port: u16,
    pub environment: Environment,
    pub gemini: GeminiConfig,
    pub groq: GroqConfig,
    pub rate_limits: EndpointLimits,
    pub body_limits: BodyLimits,
    pub max_input_length: usize,
    pub retry: RetrySettings,
    pub upstream_timeout: Duration,
    pub cache_ttl: Duration,
    pub cache_max_entries: usize,
    pub log_format: String,
}

pub const CHAT_ENDPOINT: &str = "/api/ai/chat";

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            environment: Environment::Development,
            gemini: GeminiConfig::default(),
            groq: GroqConfig::default(),
            rate_limits: EndpointLimits::new(LimitConfig::per_minute(30))
                .with_override(CHAT_ENDPOINT, LimitConfig::per_minute(10)),
            body_limits: BodyLimits::default(),
            max_input_length: 1000,
            retry: RetrySettings::default(),
            upstream_timeout: Duration::from_secs(30),
            cache_ttl: Duration::from_secs(300),
            cache_max_entries: 1000,
            log_format: "pretty".to_string(),
        }
    }
}

impl Args {
    pub fn into_config(self) -> Result<GatewayConfig, ConfigError> {
        let window = Duration::from_secs(self.rate_window);
        let mut rate_limits = EndpointLimits::new(LimitConfig {
            requests_per_window: self.rate_limit,
            window,
        })
        .with_override(
            CHAT_ENDPOINT,
            LimitConfig {
                requests_per_window: self.chat_rate_limit,
                window,
            },
        );

        for raw in self.rate_limit_overrides.iter().filter(|s| !s.trim().is_empty()) {
            let (endpoint, limit) = parse_override(raw, window)?;
            rate_limits = rate_limits.with_override(endpoint, limit);
        }
        rate_limits.validate()?;

        Ok(GatewayConfig {
            port: self.port,
            environment: Environment::parse(
                self.app_env
                    .as_deref()
                    .or(self.node_env.as_deref())
                    .unwrap_or("development"),
            ),
            gemini: GeminiConfig {
                api_key: self.gemini_api_key,
                model: self.gemini_model,
                endpoint: self.gemini_endpoint,
            },
            groq: GroqConfig {
                api_key: self.groq_api_key,
                model: self.groq_model,
                endpoint: self.groq_endpoint,
                transcription_endpoint: self.groq_transcription_endpoint,
                transcription_model: self.groq_transcription_model,
            },
            rate_limits,
            body_limits: BodyLimits {
                standard: self.max_body_bytes,
                ocr: self.ocr_max_body_bytes,
                upload: self.upload_max_body_bytes,
            },
            max_input_length: self.max_input_length,
            retry: RetrySettings {
                max_retries: self.max_retries,
                base_delay: Duration::from_millis(self.retry_base_delay_ms),
                max_delay: Duration::from_millis(self.retry_max_delay_ms),
            },
            upstream_timeout: Duration::from_secs(self.upstream_timeout),
            cache_ttl: Duration::from_secs(self.cache_ttl),
            cache_max_entries: self.cache_max_entries,
            log_format: self.log_format,
        })
    }
}

// "PATH=COUNT" keeps the global window, "PATH=COUNT/SECS" sets its own
fn parse_override(raw: &str, default_window: Duration) -> Result<(String, LimitConfig), ConfigError> {
    let invalid = || ConfigError::InvalidOverride(raw.to_string());
    let (endpoint, spec) = raw.trim().split_once('=').ok_or_else(invalid)?;
    let endpoint = endpoint.trim();
    if !endpoint.starts_with('/') {
        return Err(invalid());
    }

    let (count, window) = match spec.split_once('/') {
        Some((count, secs)) => {
            let secs: u64 = secs.trim().parse().map_err(|_| invalid())?;
            (count, Duration::from_secs(secs))
        }
        None => (spec, default_window),
    };
    let requests_per_window = count.trim().parse().map_err(|_| invalid())?;

    Ok((
        endpoint.to_string(),
        LimitConfig {
            requests_per_window,
            window,
        },
    ))
}
