//! Fixed-window rate limiting per (client identity, endpoint).
//!
//! Window state lives behind [`RateLimitStore`] so the in-memory map used
//! here can be replaced by a shared store when running several processes.

use crate::config::{EndpointLimits, LimitConfig};
use crate::metrics::RATE_LIMIT_KEYS;
use axum::http::HeaderMap;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval};
use tracing::{debug, info};

pub const UNKNOWN_CLIENT: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    pub identity: String,
    pub endpoint: String,
}

impl RateLimitKey {
    pub fn new(identity: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            endpoint: endpoint.into(),
        }
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.identity, self.endpoint)
    }
}

// Rate limit entry - tracks requests per (client, endpoint) key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitWindow {
    pub count: u32,
    pub window_start: Instant,
}

impl RateLimitWindow {
    pub fn start(now: Instant) -> Self {
        Self {
            count: 1,
            window_start: now,
        }
    }

    pub fn is_expired(&self, now: Instant, window: Duration) -> bool {
        now.saturating_duration_since(self.window_start) > window
    }
}

/// Storage for window state. `update` must apply its closure and store the
/// result as one atomic step with respect to other calls on the same key.
pub trait RateLimitStore: Send + Sync {
    fn get(&self, key: &RateLimitKey) -> Option<RateLimitWindow>;

    fn set(&self, key: RateLimitKey, window: RateLimitWindow);

    fn delete(&self, key: &RateLimitKey);

    fn update(
        &self,
        key: RateLimitKey,
        f: &mut dyn FnMut(Option<RateLimitWindow>) -> RateLimitWindow,
    ) -> RateLimitWindow;

    /// Removes every entry for which `expired` returns true; returns how many.
    fn sweep(&self, expired: &dyn Fn(&RateLimitKey, &RateLimitWindow) -> bool) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    windows: DashMap<RateLimitKey, RateLimitWindow>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RateLimitStore for MemoryStore {
    fn get(&self, key: &RateLimitKey) -> Option<RateLimitWindow> {
        self.windows.get(key).map(|entry| *entry)
    }

    fn set(&self, key: RateLimitKey, window: RateLimitWindow) {
        self.windows.insert(key, window);
    }

    fn delete(&self, key: &RateLimitKey) {
        self.windows.remove(key);
    }

    // the entry guard holds the shard lock for the whole read-modify-write
    fn update(
        &self,
        key: RateLimitKey,
        f: &mut dyn FnMut(Option<RateLimitWindow>) -> RateLimitWindow,
    ) -> RateLimitWindow {
        match self.windows.entry(key) {
            Entry::Occupied(mut occupied) => {
                let next = f(Some(*occupied.get()));
                *occupied.get_mut() = next;
                next
            }
            Entry::Vacant(vacant) => {
                let next = f(None);
                vacant.insert(next);
                next
            }
        }
    }

    fn sweep(&self, expired: &dyn Fn(&RateLimitKey, &RateLimitWindow) -> bool) -> usize {
        let before = self.windows.len();
        self.windows.retain(|key, window| !expired(key, window));
        before.saturating_sub(self.windows.len())
    }

    fn len(&self) -> usize {
        self.windows.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed { limit: u32, remaining: u32 },
    Exceeded { limit: u32, retry_after: Duration },
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    limits: EndpointLimits,
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("tracked_keys", &self.store.len())
            .field("limits", &self.limits)
            .finish()
    }
}

impl RateLimiter {
    pub fn new(limits: EndpointLimits) -> Self {
        Self::with_store(limits, Arc::new(MemoryStore::new()))
    }

    pub fn with_store(limits: EndpointLimits, store: Arc<dyn RateLimitStore>) -> Self {
        Self { store, limits }
    }

    pub fn limits(&self) -> &EndpointLimits {
        &self.limits
    }

    pub fn limit_for(&self, endpoint: &str) -> LimitConfig {
        self.limits.for_endpoint(endpoint)
    }

    pub fn tracked_keys(&self) -> usize {
        self.store.len()
    }

    /// True when `identity` has used up its window on `endpoint`. A missing
    /// or expired window is never exceeded.
    pub fn check_limit(&self, identity: &str, endpoint: &str) -> bool {
        self.check_limit_at(identity, endpoint, Instant::now())
    }

    pub fn check_limit_at(&self, identity: &str, endpoint: &str, now: Instant) -> bool {
        let limit = self.limit_for(endpoint);
        match self.store.get(&RateLimitKey::new(identity, endpoint)) {
            Some(window) if !window.is_expired(now, limit.window) => {
                window.count >= limit.requests_per_window
            }
            _ => false,
        }
    }

    /// Counts one request, opening a fresh window if needed.
    pub fn record_request(&self, identity: &str, endpoint: &str) {
        self.record_request_at(identity, endpoint, Instant::now());
    }

    pub fn record_request_at(&self, identity: &str, endpoint: &str, now: Instant) {
        let limit = self.limit_for(endpoint);
        self.store.update(RateLimitKey::new(identity, endpoint), &mut |current| match current {
            Some(window) if !window.is_expired(now, limit.window) => RateLimitWindow {
                count: window.count.saturating_add(1),
                ..window
            },
            _ => RateLimitWindow::start(now),
        });
    }

    pub fn remaining(&self, identity: &str, endpoint: &str) -> u32 {
        self.remaining_at(identity, endpoint, Instant::now())
    }

    pub fn remaining_at(&self, identity: &str, endpoint: &str, now: Instant) -> u32 {
        let limit = self.limit_for(endpoint);
        match self.store.get(&RateLimitKey::new(identity, endpoint)) {
            Some(window) if !window.is_expired(now, limit.window) => {
                limit.requests_per_window.saturating_sub(window.count)
            }
            _ => limit.requests_per_window,
        }
    }

    /// Check and record in one step: either the request is counted and
    /// allowed, or nothing changes and the caller gets the time left in the
    /// current window.
    pub fn acquire(&self, identity: &str, endpoint: &str) -> RateLimitDecision {
        self.acquire_at(identity, endpoint, Instant::now())
    }

    pub fn acquire_at(&self, identity: &str, endpoint: &str, now: Instant) -> RateLimitDecision {
        let limit = self.limit_for(endpoint);
        let mut exceeded = false;

        let window = self.store.update(RateLimitKey::new(identity, endpoint), &mut |current| {
            exceeded = false;
            match current {
                Some(window) if !window.is_expired(now, limit.window) => {
                    if window.count >= limit.requests_per_window {
                        exceeded = true;
                        window
                    } else {
                        RateLimitWindow {
                            count: window.count + 1,
                            ..window
                        }
                    }
                }
                _ => RateLimitWindow::start(now),
            }
        });

        if exceeded {
            let elapsed = now.saturating_duration_since(window.window_start);
            RateLimitDecision::Exceeded {
                limit: limit.requests_per_window,
                retry_after: limit.window.saturating_sub(elapsed),
            }
        } else {
            RateLimitDecision::Allowed {
                limit: limit.requests_per_window,
                remaining: limit.requests_per_window.saturating_sub(window.count),
            }
        }
    }

    /// Drops every window that has expired under its endpoint's limit.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub fn sweep_at(&self, now: Instant) -> usize {
        let removed = self.store.sweep(&|key, window| {
            window.is_expired(now, self.limits.for_endpoint(&key.endpoint).window)
        });
        RATE_LIMIT_KEYS.set(self.store.len() as f64);
        removed
    }
}

/// Who is calling: first `X-Forwarded-For` hop, else the socket peer, else
/// [`UNKNOWN_CLIENT`].
pub fn client_identity(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|hop| !hop.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

// Sweeper task - evicts expired windows once per `every`
pub fn spawn_sweeper(limiter: Arc<RateLimiter>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        info!(interval = ?every, "Rate limit sweeper started");

        loop {
            ticker.tick().await;
            let removed = limiter.sweep();
            if removed > 0 {
                debug!(removed, remaining = limiter.tracked_keys(), "Swept expired rate limit windows");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const CHAT: &str = "/api/ai/chat";
    const SEARCH: &str = "/api/ai/search";

    fn limiter() -> RateLimiter {
        RateLimiter::new(
            EndpointLimits::new(LimitConfig::per_minute(30)).with_override(CHAT, LimitConfig::per_minute(10)),
        )
    }

    #[test]
    fn test_key_format() {
        assert_eq!(RateLimitKey::new("10.0.0.1", CHAT).to_string(), "10.0.0.1::/api/ai/chat");
    }

    #[tokio::test(start_paused = true)]
    async fn test_limit_plus_one_is_exceeded() {
        let limiter = limiter();
        for _ in 0..10 {
            assert!(!limiter.check_limit("ip", CHAT));
            limiter.record_request("ip", CHAT);
        }
        assert!(limiter.check_limit("ip", CHAT));
        assert_eq!(limiter.remaining("ip", CHAT), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_elapses() {
        let limiter = limiter();
        for _ in 0..15 {
            limiter.record_request("ip", CHAT);
        }
        assert!(limiter.check_limit("ip", CHAT));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!limiter.check_limit("ip", CHAT));
        assert_eq!(limiter.remaining("ip", CHAT), 10);

        limiter.record_request("ip", CHAT);
        assert_eq!(limiter.remaining("ip", CHAT), 9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_boundary_is_inclusive() {
        let limiter = limiter();
        for _ in 0..10 {
            limiter.record_request("ip", CHAT);
        }
        tokio::time::advance(Duration::from_secs(60)).await;
        // exactly one window later the old window still counts
        assert!(limiter.check_limit("ip", CHAT));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let limiter = limiter();
        for _ in 0..10 {
            limiter.record_request("a", CHAT);
        }
        assert!(limiter.check_limit("a", CHAT));
        assert!(!limiter.check_limit("b", CHAT));
        assert!(!limiter.check_limit("a", SEARCH));
        assert_eq!(limiter.remaining("a", SEARCH), 30);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_thirty_then_reject() {
        let limiter = limiter();
        for n in 1..=30 {
            match limiter.acquire("ip", SEARCH) {
                RateLimitDecision::Allowed { limit, remaining } => {
                    assert_eq!(limit, 30);
                    assert_eq!(remaining, 30 - n);
                }
                other => panic!("request {n} rejected: {other:?}"),
            }
        }

        tokio::time::advance(Duration::from_secs(20)).await;
        match limiter.acquire("ip", SEARCH) {
            RateLimitDecision::Exceeded { limit, retry_after } => {
                assert_eq!(limit, 30);
                assert_eq!(retry_after, Duration::from_secs(40));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
        // rejected requests do not extend or bump the window
        assert_eq!(limiter.remaining("ip", SEARCH), 0);
        tokio::time::advance(Duration::from_secs(41)).await;
        assert!(limiter.acquire("ip", SEARCH).is_allowed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_acquire_never_exceeds_limit() {
        let limiter = Arc::new(limiter());
        let mut handles = Vec::new();
        for _ in 0..50 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move { limiter.acquire("ip", CHAT).is_allowed() }));
        }

        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_only_expired() {
        let limiter = RateLimiter::new(
            EndpointLimits::new(LimitConfig::per_minute(30)).with_override(
                CHAT,
                LimitConfig {
                    requests_per_window: 10,
                    window: Duration::from_secs(10),
                },
            ),
        );
        limiter.record_request("a", CHAT);
        limiter.record_request("a", SEARCH);
        tokio::time::advance(Duration::from_secs(11)).await;
        limiter.record_request("b", CHAT);

        assert_eq!(limiter.sweep(), 1);
        assert_eq!(limiter.tracked_keys(), 2);

        tokio::time::advance(Duration::from_secs(50)).await;
        assert_eq!(limiter.sweep(), 2);
        assert_eq!(limiter.tracked_keys(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_task_evicts() {
        let limiter = Arc::new(limiter());
        limiter.record_request("a", SEARCH);
        let handle = spawn_sweeper(Arc::clone(&limiter), Duration::from_secs(60));

        tokio::time::sleep(Duration::from_secs(125)).await;
        assert_eq!(limiter.tracked_keys(), 0);
        handle.abort();
    }

    #[test]
    fn test_memory_store_basic_ops() {
        let store = MemoryStore::new();
        let key = RateLimitKey::new("a", CHAT);
        let now = Instant::now();
        assert!(store.is_empty());

        store.set(key.clone(), RateLimitWindow::start(now));
        assert_eq!(store.get(&key).unwrap().count, 1);

        let updated = store.update(key.clone(), &mut |w| RateLimitWindow {
            count: w.map_or(0, |w| w.count) + 5,
            window_start: now,
        });
        assert_eq!(updated.count, 6);

        store.delete(&key);
        assert!(store.get(&key).is_none());
    }

    #[test]
    fn test_client_identity_resolution() {
        let peer: SocketAddr = "192.168.1.7:5555".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(client_identity(&headers, None), UNKNOWN_CLIENT);
        assert_eq!(client_identity(&headers, Some(peer)), "192.168.1.7");

        headers.insert("x-forwarded-for", HeaderValue::from_static(" 203.0.113.9 , 10.0.0.1"));
        assert_eq!(client_identity(&headers, Some(peer)), "203.0.113.9");

        headers.insert("x-forwarded-for", HeaderValue::from_static(""));
        assert_eq!(client_identity(&headers, Some(peer)), "192.168.1.7");
    }
}
