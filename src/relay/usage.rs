use crate::constants::{usage_chunks_key, usage_correlation_log_key, usage_submissions_key};
use crate::error::Result;
use crate::metrics::SubmissionMetrics;
use crate::storage::KvStore;
use std::sync::Arc;
use tracing::{debug, error};

/// Per-credential usage accounting.
///
/// Counters only grow; retention belongs to the store. Recording is a side
/// effect: failures are logged and swallowed so they never fail the request
/// that triggered them.
pub struct UsageCounter {
    store: Arc<dyn KvStore>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageSnapshot {
    pub submissions: i64,
    pub processed_chunks: i64,
    pub correlation_ids: Vec<String>,
}

impl UsageCounter {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub async fn record_submission(&self, identity: usize, correlation_id: &str) {
        if let Err(e) = self.try_record_submission(identity, correlation_id).await {
            SubmissionMetrics::record_usage_failure();
            error!("Error incrementing API call counter for token {}: {}", identity, e);
        }
    }

    async fn try_record_submission(&self, identity: usize, correlation_id: &str) -> Result<()> {
        let total = self.store.incr_by(&usage_submissions_key(identity), 1).await?;
        self.store
            .lpush(&usage_correlation_log_key(identity), correlation_id)
            .await?;
        debug!("Token {} has submitted {} tasks", identity, total);
        Ok(())
    }

    pub async fn record_chunks(&self, identity: usize, chunks: usize) {
        if chunks == 0 {
            return;
        }
        if let Err(e) = self
            .store
            .incr_by(&usage_chunks_key(identity), chunks as i64)
            .await
        {
            SubmissionMetrics::record_usage_failure();
            error!("Error incrementing processed chunk counter for token {}: {}", identity, e);
        }
    }

    pub async fn snapshot(&self, identity: usize) -> Result<UsageSnapshot> {
        let read_counter = |value: Option<serde_json::Value>| {
            value.and_then(|v| v.as_i64()).unwrap_or(0)
        };
        Ok(UsageSnapshot {
            submissions: read_counter(self.store.get(&usage_submissions_key(identity)).await?),
            processed_chunks: read_counter(self.store.get(&usage_chunks_key(identity)).await?),
            correlation_ids: self.store.list(&usage_correlation_log_key(identity)).await?,
        })
    }
}
