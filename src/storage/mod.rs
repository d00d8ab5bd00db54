//! Durable key-value store port.
//!
//! Correlation records, rate windows and usage counters all live behind this
//! trait. Every component takes the store as an explicit collaborator; there
//! is no process-wide store singleton.

mod in_memory;

pub use in_memory::InMemoryStore;

use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// Store operations the relay needs. Keys are shared across backends
/// (see `crate::constants`), values are JSON documents.
///
/// Writes to the same key from concurrent callers are not coordinated;
/// the last writer wins.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a value, `None` when absent or expired
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Write a value, replacing any previous one. `ttl` of `None` keeps the
    /// value until something deletes it.
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()>;

    /// Add `delta` to an integer counter, creating it at zero first
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64>;

    /// Prepend a string to a list, returning the new list length
    async fn lpush(&self, key: &str, value: &str) -> Result<u64>;

    /// Full list contents, most recently pushed first
    async fn list(&self, key: &str) -> Result<Vec<String>>;
}
