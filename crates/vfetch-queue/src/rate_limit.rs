//! Fixed-window request counters.
//!
//! A window opens on a client's first counted request and lasts `window`
//! from there. While fewer than `limit` requests have been counted the
//! request is allowed and counted; otherwise it is denied and not counted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::Script;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::error::QueueResult;

/// Key prefix for rate-limit counters.
pub const RATE_LIMIT_KEY_PREFIX: &str = "vfetch:rate_limit";

/// Outcome of one counted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Requests counted in the current window, including this one if allowed.
    pub count: u64,
    /// Time until the window resets.
    pub retry_after: Duration,
}

/// Atomic check-and-increment storage for counters.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn hit(&self, key: &str, limit: u64, window: Duration) -> QueueResult<RateDecision>;
}

/// Redis counters with EXPIRE-driven windows.
pub struct RedisCounterStore {
    client: redis::Client,
    hit_script: Script,
}

impl RedisCounterStore {
    pub fn new(redis_url: &str) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            // Read, compare and increment in one round trip so concurrent
            // requests cannot both observe limit - 1.
            hit_script: Script::new(
                r#"
                local count = tonumber(redis.call('GET', KEYS[1]) or '0')
                local limit = tonumber(ARGV[1])
                if count >= limit then
                    local ttl = redis.call('TTL', KEYS[1])
                    if ttl < 0 then
                        redis.call('EXPIRE', KEYS[1], ARGV[2])
                        ttl = tonumber(ARGV[2])
                    end
                    return {0, count, ttl}
                end
                count = redis.call('INCR', KEYS[1])
                if count == 1 then
                    redis.call('EXPIRE', KEYS[1], ARGV[2])
                end
                local ttl = redis.call('TTL', KEYS[1])
                return {1, count, ttl}
                "#,
            ),
        })
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn hit(&self, key: &str, limit: u64, window: Duration) -> QueueResult<RateDecision> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let (allowed, count, ttl): (i64, u64, i64) = self
            .hit_script
            .key(format!("{}:{}", RATE_LIMIT_KEY_PREFIX, key))
            .arg(limit)
            .arg(window.as_secs().max(1))
            .invoke_async(&mut conn)
            .await?;

        Ok(RateDecision {
            allowed: allowed == 1,
            count,
            retry_after: Duration::from_secs(ttl.max(0) as u64),
        })
    }
}

#[derive(Debug)]
struct Window {
    count: u64,
    reset_at: Instant,
}

/// In-process counters for tests and single-binary runs.
#[derive(Default)]
pub struct MemoryCounterStore {
    windows: Mutex<HashMap<String, Window>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn hit(&self, key: &str, limit: u64, window: Duration) -> QueueResult<RateDecision> {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;

        // Expired windows are dropped so the map does not grow without bound
        windows.retain(|_, w| w.reset_at > now);

        let entry = windows.entry(key.to_string()).or_insert(Window {
            count: 0,
            reset_at: now + window,
        });

        let allowed = entry.count < limit;
        if allowed {
            entry.count += 1;
        }

        Ok(RateDecision {
            allowed,
            count: entry.count,
            retry_after: entry.reset_at.saturating_duration_since(now),
        })
    }
}

/// Per-client request limiter.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    limit: u64,
    window: Duration,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, limit: u64, window: Duration) -> Self {
        Self {
            store,
            limit,
            window,
        }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Count a request from `client_id` and decide whether it may proceed.
    pub async fn check_and_increment(&self, client_id: &str) -> QueueResult<RateDecision> {
        let decision = self.store.hit(client_id, self.limit, self.window).await?;
        if !decision.allowed {
            debug!(
                client_id = %client_id,
                count = decision.count,
                retry_after_secs = decision.retry_after.as_secs(),
                "Rate limit exceeded"
            );
        }
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(limit: u64, window_secs: u64) -> RateLimiter {
        RateLimiter::new(
            Arc::new(MemoryCounterStore::new()),
            limit,
            Duration::from_secs(window_secs),
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_never_exceed_limit() {
        let limiter = limiter(5, 60);
        let mut requests = tokio::task::JoinSet::new();
        for _ in 0..50 {
            let limiter = limiter.clone();
            requests.spawn(async move { limiter.check_and_increment("10.0.0.1").await.unwrap() });
        }

        let mut allowed = 0;
        while let Some(decision) = requests.join_next().await {
            if decision.unwrap().allowed {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_allows_up_to_limit() {
        let limiter = limiter(3, 60);

        for expected in 1..=3 {
            let decision = limiter.check_and_increment("10.0.0.1").await.unwrap();
            assert!(decision.allowed);
            assert_eq!(decision.count, expected);
        }

        let denied = limiter.check_and_increment("10.0.0.1").await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.count, 3);
        assert_eq!(denied.retry_after, Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clients_are_independent() {
        let limiter = limiter(1, 60);

        assert!(limiter.check_and_increment("a").await.unwrap().allowed);
        assert!(!limiter.check_and_increment("a").await.unwrap().allowed);
        assert!(limiter.check_and_increment("b").await.unwrap().allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_resets_after_expiry() {
        let limiter = limiter(2, 60);

        limiter.check_and_increment("a").await.unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;
        limiter.check_and_increment("a").await.unwrap();

        let denied = limiter.check_and_increment("a").await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after, Duration::from_secs(30));

        // Window is anchored at the first request, not the latest
        tokio::time::advance(Duration::from_secs(31)).await;
        let decision = limiter.check_and_increment("a").await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_denied_requests_do_not_extend_window() {
        let limiter = limiter(1, 10);

        limiter.check_and_increment("a").await.unwrap();
        for _ in 0..5 {
            tokio::time::advance(Duration::from_secs(1)).await;
            assert!(!limiter.check_and_increment("a").await.unwrap().allowed);
        }

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(limiter.check_and_increment("a").await.unwrap().allowed);
    }
}
