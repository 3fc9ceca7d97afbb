use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, HistogramVec, register_counter, register_counter_vec, register_gauge,
    register_histogram_vec,
};

lazy_static! {
    pub static ref REQUEST_TOTAL: CounterVec = register_counter_vec!(
        "brightai_requests_total",
        "Total number of requests",
        &["route"]
    )
    .unwrap();
    pub static ref REQUEST_LATENCY: HistogramVec = register_histogram_vec!(
        "brightai_request_latency_seconds",
        "Request latency in seconds",
        &["route"]
    )
    .unwrap();
    pub static ref RATE_LIMITED_TOTAL: Counter =
        register_counter!("brightai_rate_limited_total", "Requests rejected by the rate limiter").unwrap();
    pub static ref RATE_LIMIT_KEYS: Gauge =
        register_gauge!("brightai_rate_limit_keys", "Tracked (client, endpoint) windows").unwrap();
    pub static ref UPSTREAM_RETRIES: CounterVec = register_counter_vec!(
        "brightai_upstream_retries_total",
        "Retried upstream calls",
        &["upstream"]
    )
    .unwrap();
    pub static ref UPSTREAM_FAILURES: CounterVec = register_counter_vec!(
        "brightai_upstream_failures_total",
        "Upstream calls that failed after retries",
        &["upstream"]
    )
    .unwrap();
    pub static ref CACHE_HITS: Counter =
        register_counter!("brightai_cache_hits_total", "Total response cache hits").unwrap();
    pub static ref CACHE_MISSES: Counter =
        register_counter!("brightai_cache_misses_total", "Total response cache misses").unwrap();
    pub static ref CACHE_SIZE: Gauge =
        register_gauge!("brightai_cache_size", "Current number of items in the response cache").unwrap();
    pub static ref ACTIVE_SESSIONS: Gauge =
        register_gauge!("brightai_active_sessions", "Conversation sessions held in memory").unwrap();
}

// Prometheus text exposition of every registered metric
pub fn render() -> Result<String, prometheus::Error> {
    use prometheus::{Encoder, TextEncoder};

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
