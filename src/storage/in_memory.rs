use super::KvStore;
use crate::error::{RelayError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// Expired entries are swept on write at most this often
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct Values {
    entries: HashMap<String, Entry>,
    last_sweep: Instant,
}

impl Values {
    fn sweep_if_due(&mut self, now: Instant) {
        if now.duration_since(self.last_sweep) < SWEEP_INTERVAL {
            return;
        }
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        self.last_sweep = now;
        let evicted = before - self.entries.len();
        if evicted > 0 {
            debug!("Swept {} expired keys", evicted);
        }
    }
}

/// In-memory store for development/testing.
///
/// Expiry is evaluated against tokio's clock, so tests running on a paused
/// runtime can advance past a TTL. Reads drop the expired key they hit;
/// writes periodically sweep every expired key.
#[derive(Debug)]
pub struct InMemoryStore {
    values: Mutex<Values>,
    lists: Mutex<HashMap<String, VecDeque<String>>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self {
            values: Mutex::new(Values {
                entries: HashMap::new(),
                last_sweep: Instant::now(),
            }),
            lists: Mutex::new(HashMap::new()),
        }
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    async fn entry_count(&self) -> usize {
        self.values.lock().await.entries.len()
    }
}

#[async_trait]
impl KvStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let now = Instant::now();
        let mut values = self.values.lock().await;
        match values.entries.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                debug!("Evicting expired key {}", key);
                values.entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        let now = Instant::now();
        let expires_at = ttl.map(|ttl| now + ttl);
        let mut values = self.values.lock().await;
        values.sweep_if_due(now);
        values
            .entries
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        let now = Instant::now();
        let mut values = self.values.lock().await;
        values.sweep_if_due(now);
        let current = match values.entries.get(key) {
            Some(entry) if entry.is_live(now) => entry.value.as_i64().ok_or_else(|| {
                RelayError::Store(format!("value at '{key}' is not an integer"))
            })?,
            _ => 0,
        };
        let next = current + delta;
        values.entries.insert(
            key.to_string(),
            Entry {
                value: Value::from(next),
                expires_at: None,
            },
        );
        Ok(next)
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<u64> {
        let mut lists = self.lists.lock().await;
        let list = lists.entry(key.to_string()).or_default();
        list.push_front(value.to_string());
        Ok(list.len() as u64)
    }

    async fn list(&self, key: &str) -> Result<Vec<String>> {
        let lists = self.lists.lock().await;
        Ok(lists
            .get(key)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default())
    }
}
