use crate::constants::task_key;
use crate::error::Result;
use crate::storage::KvStore;
use crate::types::{CorrelationRecord, TaskStatus};
use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const SUFFIX_LEN: usize = 11;

/// Time-based prefix (base36 millis) plus a random lowercase suffix.
///
/// Matches the format of ids already issued to callers; it is lowercase
/// alphanumeric so it embeds in the postback URL path unescaped.
pub fn generate_correlation_id() -> String {
    let millis = Utc::now().timestamp_millis().max(0) as u64;
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SUFFIX_LEN)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect();
    format!("{}{}", to_base36(millis), suffix)
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

/// Reads and writes correlation records under `task:<taskId>`.
pub struct CorrelationStore {
    store: Arc<dyn KvStore>,
    record_ttl: Duration,
}

impl CorrelationStore {
    pub fn new(store: Arc<dyn KvStore>, record_ttl: Duration) -> Self {
        Self { store, record_ttl }
    }

    pub async fn save(&self, record: &CorrelationRecord) -> Result<()> {
        self.store
            .set(
                &task_key(&record.task_id),
                serde_json::to_value(record)?,
                Some(self.record_ttl),
            )
            .await
    }

    /// `None` for unknown or expired tasks, and for records that no longer parse
    pub async fn load(&self, task_id: &str) -> Result<Option<CorrelationRecord>> {
        let Some(value) = self.store.get(&task_key(task_id)).await? else {
            return Ok(None);
        };
        match serde_json::from_value(value) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!("Ignoring unreadable correlation record for task {}: {}", task_id, e);
                Ok(None)
            }
        }
    }

    /// Move a record to `status`, keeping the remainder of its original TTL.
    /// Returns false when the record is gone or already expired.
    pub async fn mark_status(&self, task_id: &str, status: TaskStatus) -> Result<bool> {
        let Some(mut record) = self.load(task_id).await? else {
            return Ok(false);
        };
        let age = (Utc::now() - record.created_at).to_std().unwrap_or_default();
        let Some(remaining) = self.record_ttl.checked_sub(age).filter(|d| !d.is_zero()) else {
            return Ok(false);
        };

        record.status = status;
        self.store
            .set(&task_key(task_id), serde_json::to_value(&record)?, Some(remaining))
            .await?;
        debug!("Task {} marked {:?}", task_id, status);
        Ok(true)
    }
}
