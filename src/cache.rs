use crate::metrics::{CACHE_HITS, CACHE_MISSES, CACHE_SIZE};
use dashmap::DashMap;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

// Cache entry with timestamp
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub response: Value,
    pub created_at: Instant,
}

// Create a cache key (hash of endpoint + canonical request body)
pub fn make_cache_key(endpoint: &str, body: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(endpoint.as_bytes());
    hasher.update([0u8]);
    // serde_json keeps object keys sorted, so equal bodies hash equally
    hasher.update(body.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// TTL + size bounded cache for idempotent model answers (search, summary).
#[derive(Debug)]
pub struct ResponseCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
    max_entries: usize,
}

impl ResponseCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            max_entries,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if now.saturating_duration_since(entry.created_at) < self.ttl {
                CACHE_HITS.inc();
                debug!(key, "Cache HIT");
                return Some(entry.response.clone());
            }
        }

        // expired entries go on read
        if self
            .entries
            .remove_if(key, |_, entry| now.saturating_duration_since(entry.created_at) >= self.ttl)
            .is_some()
        {
            CACHE_SIZE.set(self.entries.len() as f64);
        }
        CACHE_MISSES.inc();
        debug!(key, "Cache MISS");
        None
    }

    pub fn insert(&self, key: String, response: Value) {
        if self.max_entries == 0 || self.ttl.is_zero() {
            return;
        }
        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_entries {
            self.evict_oldest();
        }
        self.entries.insert(
            key,
            CacheEntry {
                response,
                created_at: Instant::now(),
            },
        );
        CACHE_SIZE.set(self.entries.len() as f64);
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.created_at)
            .map(|entry| entry.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }

    pub fn clear(&self) {
        self.entries.clear();
        CACHE_SIZE.set(0.0);
    }
}
