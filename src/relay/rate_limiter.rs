use crate::constants::rate_limit_key;
use crate::error::Result;
use crate::storage::KvStore;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Sliding-window admission control over the shared store.
///
/// Each key keeps a list of request timestamps (unix millis) under
/// `ratelimit:<key>`, stored with a TTL equal to the window so idle keys
/// clean themselves up.
///
/// The read-filter-append sequence is not atomic: concurrent callers sharing
/// a key can both observe `limit - 1` entries and both be admitted. Admission
/// is best-effort, not exact.
pub struct RateLimiter {
    store: Arc<dyn KvStore>,
    limit: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn KvStore>, limit: usize, window: Duration) -> Self {
        Self { store, limit, window }
    }

    /// Admit or deny one request for `key` at the current time
    pub async fn allow(&self, key: &str) -> Result<bool> {
        self.allow_at(key, Utc::now().timestamp_millis()).await
    }

    /// Admission decision as of `now_ms`. A denial leaves stored state untouched.
    pub async fn allow_at(&self, key: &str, now_ms: i64) -> Result<bool> {
        let store_key = rate_limit_key(key);
        let window_start = now_ms - self.window.as_millis() as i64;

        let mut requests: Vec<i64> = match self.store.get(&store_key).await? {
            Some(Value::Array(entries)) => entries.iter().filter_map(Value::as_i64).collect(),
            Some(other) => {
                warn!("Discarding unreadable rate window for {}: {}", key, other);
                Vec::new()
            }
            None => Vec::new(),
        };
        requests.retain(|&t| t > window_start && t <= now_ms);

        if requests.len() >= self.limit {
            debug!("Rate limit reached for {} ({} in window)", key, requests.len());
            return Ok(false);
        }

        requests.push(now_ms);
        self.store
            .set(&store_key, Value::from(requests), Some(self.window))
            .await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStore;
    use serde_json::json;

    fn limiter(limit: usize, window_secs: u64) -> (RateLimiter, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let limiter = RateLimiter::new(store.clone(), limit, Duration::from_secs(window_secs));
        (limiter, store)
    }

    #[tokio::test]
    async fn test_admits_up_to_limit_then_denies() {
        let (limiter, _) = limiter(3, 10);
        let t0 = 1_700_000_000_000;

        for i in 0..3 {
            assert!(limiter.allow_at("1.2.3.4", t0 + i * 100).await.unwrap());
        }
        assert!(!limiter.allow_at("1.2.3.4", t0 + 500).await.unwrap());

        // Past the window every earlier timestamp has aged out
        assert!(limiter.allow_at("1.2.3.4", t0 + 10_300).await.unwrap());
    }

    #[tokio::test]
    async fn test_denial_does_not_mutate_window() {
        let (limiter, store) = limiter(1, 60);
        let t0 = 1_700_000_000_000;

        assert!(limiter.allow_at("k", t0).await.unwrap());
        assert!(!limiter.allow_at("k", t0 + 1).await.unwrap());

        assert_eq!(store.get("ratelimit:k").await.unwrap(), Some(json!([t0])));
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let (limiter, _) = limiter(1, 60);
        let t0 = 1_700_000_000_000;

        assert!(limiter.allow_at("a", t0).await.unwrap());
        assert!(limiter.allow_at("b", t0).await.unwrap());
        assert!(!limiter.allow_at("a", t0 + 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_stale_entries_are_pruned_before_append() {
        let (limiter, store) = limiter(2, 1);
        let t0 = 1_700_000_000_000;

        assert!(limiter.allow_at("k", t0).await.unwrap());
        assert!(limiter.allow_at("k", t0 + 2_000).await.unwrap());

        assert_eq!(store.get("ratelimit:k").await.unwrap(), Some(json!([t0 + 2_000])));
    }

    #[tokio::test]
    async fn test_allow_uses_wall_clock() {
        let (limiter, _) = limiter(2, 60);
        assert!(limiter.allow("client").await.unwrap());
        assert!(limiter.allow("client").await.unwrap());
        assert!(!limiter.allow("client").await.unwrap());
    }
}
