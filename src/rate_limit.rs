// ============================================================================
// Rate Limiting Module
// ============================================================================
//
// Fixed-window rate limiting for the anonymous contact endpoint, keyed by
// client network identity.
//
// Key features:
// - Pluggable store: in-process map (single instance) or Redis counters
//   with TTL (multi-instance consistency)
// - Atomic count-then-compare per key under concurrency
// - Fail closed: a store error denies the request instead of waving it
//   through, so the abuse-prevention guarantee survives backend outages
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use redis::AsyncCommands;
use tokio::sync::Mutex;

/// Outcome of a rate-limit check. This type is the whole caller contract:
/// the limiter never surfaces errors.
#[derive(Debug, Clone, Copy)]
pub struct RateDecision {
    pub allowed: bool,
    /// Seconds until the current window expires; 0 when allowed
    pub retry_after_secs: u64,
}

impl RateDecision {
    fn allowed() -> Self {
        Self {
            allowed: true,
            retry_after_secs: 0,
        }
    }

    fn denied(retry_after: Duration) -> Self {
        Self {
            allowed: false,
            retry_after_secs: ceil_secs(retry_after).max(1),
        }
    }
}

/// Round a duration up to whole seconds
fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

/// Backing store for per-identity window counters.
///
/// The store only counts; the limit comparison lives in [`RateLimiter`] so
/// the implementation can be swapped (local map now, shared cache later)
/// without touching any caller.
#[async_trait]
pub trait RateStore: Send + Sync {
    /// Increment the counter for `key` within the current fixed window and
    /// return the post-increment count. A fresh window starts at 1.
    async fn increment(&self, key: &str, window: Duration) -> Result<u64>;

    /// Time remaining until the current window for `key` expires
    async fn retry_after(&self, key: &str, window: Duration) -> Result<Duration>;
}

// ============================================================================
// In-Memory Store
// ============================================================================

struct RateLimitEntry {
    count: u64,
    window_start: Instant,
}

/// Process-local store. The single mutex makes count-then-compare-then-
/// increment atomic per key: two concurrent requests from the same identity
/// cannot both observe the last free slot.
#[derive(Default)]
pub struct MemoryRateStore {
    entries: Mutex<HashMap<String, RateLimitEntry>>,
}

impl MemoryRateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateStore for MemoryRateStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<u64> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;

        let entry = entries.entry(key.to_string()).or_insert(RateLimitEntry {
            count: 0,
            window_start: now,
        });

        // Window rollover: expired entries are logically recreated
        if now.duration_since(entry.window_start) >= window {
            entry.count = 0;
            entry.window_start = now;
        }

        entry.count += 1;
        Ok(entry.count)
    }

    async fn retry_after(&self, key: &str, window: Duration) -> Result<Duration> {
        let entries = self.entries.lock().await;
        let remaining = match entries.get(key) {
            Some(entry) => window.saturating_sub(entry.window_start.elapsed()),
            None => Duration::ZERO,
        };
        Ok(remaining)
    }
}

// ============================================================================
// Redis Store
// ============================================================================

/// Redis-backed store for horizontally scaled deployments.
///
/// Uses INCR with an EXPIRE set on the first increment, so the key's TTL is
/// the window and Redis itself performs the rollover.
#[derive(Clone)]
pub struct RedisRateStore {
    conn: redis::aio::ConnectionManager,
}

impl RedisRateStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| anyhow::anyhow!("Failed to parse Redis URL: {}", e))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to Redis: {}", e))?;
        Ok(Self { conn })
    }

    fn key(key: &str) -> String {
        format!("contact_rate:{}", key)
    }
}

#[async_trait]
impl RateStore for RedisRateStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<u64> {
        let count_key = Self::key(key);
        let mut conn = self.conn.clone();

        let count: u64 = conn.incr(&count_key, 1).await?;

        // Set expiry only on first increment (when count == 1)
        if count == 1 {
            let _: bool = conn.expire(&count_key, window.as_secs() as i64).await?;
        }

        Ok(count)
    }

    async fn retry_after(&self, key: &str, window: Duration) -> Result<Duration> {
        let count_key = Self::key(key);
        let mut conn = self.conn.clone();

        let ttl: i64 = conn.ttl(&count_key).await?;
        if ttl < 0 {
            // Key missing or without TTL; report a full window
            return Ok(window);
        }
        Ok(Duration::from_secs(ttl as u64))
    }
}

// ============================================================================
// Rate Limiter
// ============================================================================

/// Fixed-window limiter over a pluggable [`RateStore`].
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateStore>,
    max_requests: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateStore>, max_requests: u32, window: Duration) -> Self {
        Self {
            store,
            max_requests,
            window,
        }
    }

    /// Check whether `key` may proceed, consuming one slot.
    ///
    /// Always returns a decision. Store failures deny with a full-window
    /// backoff: for an anonymous abuse surface, an unavailable counter
    /// backend must not turn the limiter off.
    pub async fn check(&self, key: &str) -> RateDecision {
        match self.store.increment(key, self.window).await {
            Ok(count) if count <= u64::from(self.max_requests) => RateDecision::allowed(),
            Ok(count) => {
                let retry_after = match self.store.retry_after(key, self.window).await {
                    Ok(remaining) => remaining,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to read rate window TTL");
                        self.window
                    }
                };
                tracing::debug!(
                    count = count,
                    limit = self.max_requests,
                    "Rate limit window exhausted"
                );
                RateDecision::denied(retry_after)
            }
            Err(e) => {
                tracing::error!(error = %e, "Rate store unavailable, failing closed");
                RateDecision::denied(self.window)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max: u32, window: Duration) -> RateLimiter {
        RateLimiter::new(Arc::new(MemoryRateStore::new()), max, window)
    }

    #[tokio::test]
    async fn test_admits_up_to_limit_then_denies() {
        let limiter = limiter(5, Duration::from_secs(3600));

        for _ in 0..5 {
            assert!(limiter.check("203.0.113.9").await.allowed);
        }

        let decision = limiter.check("203.0.113.9").await;
        assert!(!decision.allowed);
        assert!(decision.retry_after_secs > 0);
        assert!(decision.retry_after_secs <= 3600);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let limiter = limiter(1, Duration::from_secs(3600));

        assert!(limiter.check("a").await.allowed);
        assert!(!limiter.check("a").await.allowed);
        assert!(limiter.check("b").await.allowed);
    }

    #[tokio::test]
    async fn test_window_rollover_resets_capacity() {
        let limiter = limiter(2, Duration::from_millis(200));

        assert!(limiter.check("k").await.allowed);
        assert!(limiter.check("k").await.allowed);
        assert!(!limiter.check("k").await.allowed);

        tokio::time::sleep(Duration::from_millis(250)).await;

        assert!(limiter.check("k").await.allowed);
    }

    #[tokio::test]
    async fn test_concurrent_requests_admit_exactly_the_limit() {
        let limiter = Arc::new(limiter(5, Duration::from_secs(3600)));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.check("same-identity").await.allowed
            }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 5);
    }

    struct FailingStore;

    #[async_trait]
    impl RateStore for FailingStore {
        async fn increment(&self, _key: &str, _window: Duration) -> Result<u64> {
            anyhow::bail!("store down")
        }

        async fn retry_after(&self, _key: &str, _window: Duration) -> Result<Duration> {
            anyhow::bail!("store down")
        }
    }

    #[tokio::test]
    async fn test_store_failure_fails_closed() {
        let limiter = RateLimiter::new(Arc::new(FailingStore), 5, Duration::from_secs(3600));
        let decision = limiter.check("anyone").await;
        assert!(!decision.allowed);
        assert_eq!(decision.retry_after_secs, 3600);
    }

    // Note: These are integration tests that require a Redis instance

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_redis_store_increment_and_ttl() {
        let store = RedisRateStore::connect("redis://127.0.0.1:6379")
            .await
            .unwrap();
        let window = Duration::from_secs(60);

        let count1 = store.increment("redis_test_key", window).await.unwrap();
        let count2 = store.increment("redis_test_key", window).await.unwrap();
        assert_eq!(count2, count1 + 1);

        let remaining = store.retry_after("redis_test_key", window).await.unwrap();
        assert!(remaining <= window);
    }
}
