//! Per-client token-bucket rate limiting.
//!
//! Buckets are created lazily on a client's first request and each carries its
//! own lock, so steady-state admission for different clients never contends.
//! The bucket map itself is behind a read-write lock: lookups take the read
//! side, only creation takes the write side.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Capacity and refill rate for one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct LimitConfig {
    /// Maximum burst.
    pub capacity: u32,
    /// Tokens added per second.
    pub rate_per_sec: u32,
}

impl LimitConfig {
    pub const fn new(capacity: u32, rate_per_sec: u32) -> Self {
        Self {
            capacity,
            rate_per_sec,
        }
    }
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self::new(100, 10)
    }
}

/// A single client's token bucket.
#[derive(Debug)]
struct TokenBucket {
    capacity: u64,
    tokens: u64,
    rate: u64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(config: LimitConfig, now: Instant) -> Self {
        Self {
            capacity: u64::from(config.capacity),
            tokens: u64::from(config.capacity),
            rate: u64::from(config.rate_per_sec),
            last_refill: now,
        }
    }

    fn try_acquire(&mut self, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        let new_tokens = (elapsed * self.rate as f64).floor() as u64;

        // The clock only moves once a whole token has accrued, so partial
        // progress carries over to the next call.
        if new_tokens > 0 {
            self.tokens = self.capacity.min(self.tokens.saturating_add(new_tokens));
            self.last_refill = now;
        }

        if self.tokens > 0 {
            self.tokens -= 1;
            true
        } else {
            false
        }
    }

    /// Whether a refill at `now` would bring the bucket to capacity.
    fn is_full_at(&self, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        let new_tokens = (elapsed * self.rate as f64).floor() as u64;
        self.tokens.saturating_add(new_tokens) >= self.capacity
    }

    fn sized_as(&self, config: LimitConfig) -> bool {
        self.capacity == u64::from(config.capacity) && self.rate == u64::from(config.rate_per_sec)
    }
}

/// Read-only view of a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BucketSnapshot {
    pub capacity: u64,
    pub tokens: u64,
    pub rate_per_sec: u64,
}

/// Per-client token-bucket limiter.
#[derive(Debug)]
pub struct RateLimiter {
    buckets: RwLock<HashMap<String, Arc<Mutex<TokenBucket>>>>,
    clients: DashMap<String, LimitConfig>,
    default: ArcSwap<LimitConfig>,
}

impl RateLimiter {
    /// Create a limiter with explicit per-client overrides and a fallback.
    pub fn new<I>(clients: I, default: LimitConfig) -> Self
    where
        I: IntoIterator<Item = (String, LimitConfig)>,
    {
        Self {
            buckets: RwLock::new(HashMap::new()),
            clients: clients.into_iter().collect(),
            default: ArcSwap::from_pointee(default),
        }
    }

    /// Admit or reject one request for `client`. Never blocks on other clients.
    pub fn allow(&self, client: &str) -> bool {
        self.allow_at(client, Instant::now())
    }

    pub(crate) fn allow_at(&self, client: &str, now: Instant) -> bool {
        let bucket = self.bucket(client, now);
        let mut bucket = bucket.lock().unwrap_or_else(PoisonError::into_inner);
        bucket.try_acquire(now)
    }

    fn bucket(&self, client: &str, now: Instant) -> Arc<Mutex<TokenBucket>> {
        {
            let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(bucket) = buckets.get(client) {
                return bucket.clone();
            }
        }

        let mut buckets = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        // Another caller may have won the race between the two locks.
        buckets
            .entry(client.to_string())
            .or_insert_with(|| {
                let config = self.config_for(client);
                tracing::debug!(
                    client = %client,
                    capacity = config.capacity,
                    rate_per_sec = config.rate_per_sec,
                    "Created rate limit bucket"
                );
                Arc::new(Mutex::new(TokenBucket::new(config, now)))
            })
            .clone()
    }

    /// The config a new bucket for `client` would be created with.
    pub fn config_for(&self, client: &str) -> LimitConfig {
        self.clients
            .get(client)
            .map(|entry| *entry.value())
            .unwrap_or_else(|| **self.default.load())
    }

    /// Install or overwrite a client's config.
    ///
    /// An existing bucket for the client keeps the capacity and rate it was
    /// created with until the client is removed.
    pub fn set_client(&self, client: impl Into<String>, config: LimitConfig) {
        self.clients.insert(client.into(), config);
    }

    /// Drop a client's config and bucket. Returns whether anything was removed.
    pub fn remove_client(&self, client: &str) -> bool {
        let had_config = self.clients.remove(client).is_some();
        let had_bucket = self
            .buckets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(client)
            .is_some();
        had_config || had_bucket
    }

    /// Replace the fallback config used for clients without an override.
    pub fn set_default(&self, config: LimitConfig) {
        self.default.store(Arc::new(config));
    }

    pub fn default_config(&self) -> LimitConfig {
        **self.default.load()
    }

    /// Snapshot of all explicit client configs, sorted by id.
    pub fn clients(&self) -> Vec<(String, LimitConfig)> {
        let mut clients: Vec<_> = self
            .clients
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        clients.sort_by(|a, b| a.0.cmp(&b.0));
        clients
    }

    /// Current state of a client's bucket, if one exists.
    pub fn bucket_snapshot(&self, client: &str) -> Option<BucketSnapshot> {
        let bucket = self
            .buckets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(client)
            .cloned()?;
        let bucket = bucket.lock().unwrap_or_else(PoisonError::into_inner);
        Some(BucketSnapshot {
            capacity: bucket.capacity,
            tokens: bucket.tokens,
            rate_per_sec: bucket.rate,
        })
    }

    /// Number of live buckets.
    pub fn bucket_count(&self) -> usize {
        self.buckets.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Drop buckets that a fresh bucket would replace exactly. Returns how
    /// many were dropped.
    ///
    /// A bucket is dropped only when it has refilled to capacity, is still
    /// sized as its client's current config, and no request holds it.
    pub fn evict_idle(&self) -> usize {
        self.evict_idle_at(Instant::now())
    }

    pub(crate) fn evict_idle_at(&self, now: Instant) -> usize {
        let mut buckets = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        let before = buckets.len();
        buckets.retain(|client, bucket| {
            if Arc::strong_count(bucket) > 1 {
                return true;
            }
            let state = bucket.lock().unwrap_or_else(PoisonError::into_inner);
            !(state.is_full_at(now) && state.sized_as(self.config_for(client)))
        });
        before - buckets.len()
    }
}
