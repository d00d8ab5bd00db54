use crate::app::ports::{HttpPostResult, WebhookPort};
use crate::constants::{BASE_BACKOFF_MS, MAX_DELIVERY_ATTEMPTS, MAX_ITEMS_PER_CALL};
use crate::error::{RelayError, Result};
use crate::metrics::DeliveryMetrics;
use crate::relay::postback::with_items;
use crate::types::{DeliveryAcknowledgement, DeliveryEnvelope, DeliveryReport, NormalizedCallback};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone)]
pub struct DeliverySettings {
    pub max_items_per_call: usize,
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            max_items_per_call: MAX_ITEMS_PER_CALL,
            max_attempts: MAX_DELIVERY_ATTEMPTS,
            base_backoff: Duration::from_millis(BASE_BACKOFF_MS),
        }
    }
}

/// Splits a callback's items into bounded chunks and posts them, in order,
/// to the destination webhook.
pub struct DeliveryEngine {
    webhook: Arc<dyn WebhookPort>,
    settings: DeliverySettings,
}

impl DeliveryEngine {
    pub fn new(webhook: Arc<dyn WebhookPort>, settings: DeliverySettings) -> Self {
        Self { webhook, settings }
    }

    /// Caller override first, then the configured default. Empty strings
    /// count as absent.
    pub fn resolve_destination(
        callback: &NormalizedCallback,
        default_destination: Option<&str>,
    ) -> Result<String> {
        let present = |url: &&str| !url.trim().is_empty();
        callback
            .webhook_override
            .as_deref()
            .filter(present)
            .or(default_destination.filter(present))
            .map(str::to_string)
            .ok_or_else(|| RelayError::MissingDestination {
                task_id: callback.task_id.clone(),
            })
    }

    /// Build every chunk envelope for `callback`, in delivery order
    pub fn chunk_envelopes(&self, callback: &NormalizedCallback) -> Vec<DeliveryEnvelope> {
        let chunk_size = self.settings.max_items_per_call.max(1);
        let chunks: Vec<&[Value]> = callback.items.chunks(chunk_size).collect();
        let total_chunks = chunks.len();

        chunks
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| DeliveryEnvelope {
                task_id: callback.task_id.clone(),
                chunk_index: i + 1,
                total_chunks,
                total_item_count: callback.total_item_count,
                unique_item_count: callback.unique_item_count,
                payload_slice: with_items(&callback.raw_envelope, chunk.to_vec()),
                extra: callback.extra.clone(),
            })
            .collect()
    }

    /// Deliver every chunk of `callback`. The first failing chunk aborts the
    /// rest; nothing is retried beyond rate-limit backoff.
    #[instrument(
        skip(self, callback, default_destination),
        fields(
            task_id = %callback.task_id,
            keyword = %callback.keyword,
            location_code = %callback.location_code
        )
    )]
    pub async fn deliver(
        &self,
        callback: &NormalizedCallback,
        default_destination: Option<&str>,
    ) -> Result<DeliveryReport> {
        let started = Instant::now();
        let outcome = self.try_deliver(callback, default_destination).await;
        DeliveryMetrics::record_duration(started.elapsed().as_secs_f64());
        if outcome.is_err() {
            DeliveryMetrics::record_failure();
        }
        outcome
    }

    async fn try_deliver(
        &self,
        callback: &NormalizedCallback,
        default_destination: Option<&str>,
    ) -> Result<DeliveryReport> {
        if callback.items.is_empty() {
            // Nothing to deliver, so a missing destination only skips the notice
            let destination = match Self::resolve_destination(callback, default_destination) {
                Ok(destination) => {
                    self.acknowledge(callback, &destination).await;
                    Some(destination)
                }
                Err(e) => {
                    warn!("Skipping acknowledgement: {}", e);
                    None
                }
            };
            return Ok(DeliveryReport {
                destination,
                total_chunks: 0,
                chunks_delivered: 0,
                acknowledgement_only: true,
            });
        }

        let destination = Self::resolve_destination(callback, default_destination)?;
        let envelopes = self.chunk_envelopes(callback);
        let total_chunks = envelopes.len();
        for envelope in &envelopes {
            debug!(
                chunk_index = envelope.chunk_index,
                total_chunks,
                total_items = envelope.total_item_count,
                unique_items = envelope.unique_item_count,
                "Sending webhook payload"
            );
            let payload = serde_json::to_value(envelope)?;
            let response = self
                .send_with_retry(&destination, &payload)
                .await
                .map_err(|e| match e {
                    RelayError::DeliveryExhausted { .. } => e,
                    other => RelayError::DeliveryFailed {
                        chunk_index: envelope.chunk_index,
                        reason: other.to_string(),
                    },
                })?;

            if !response.is_success() {
                return Err(RelayError::DeliveryFailed {
                    chunk_index: envelope.chunk_index,
                    reason: format!("webhook answered {}", response.status),
                });
            }
            DeliveryMetrics::record_chunk_delivered();
            info!("Chunk {}/{} forwarded to webhook", envelope.chunk_index, total_chunks);
        }

        Ok(DeliveryReport {
            destination: Some(destination),
            total_chunks,
            chunks_delivered: total_chunks,
            acknowledgement_only: false,
        })
    }

    /// Best-effort notice that a postback carried no items
    async fn acknowledge(&self, callback: &NormalizedCallback, destination: &str) {
        let ack = DeliveryAcknowledgement {
            task_id: callback.task_id.clone(),
            total_chunks: 0,
            total_item_count: 0,
            unique_item_count: 0,
            message: "Postback received but no items to process".to_string(),
            extra: callback.extra.clone(),
        };
        let payload = match serde_json::to_value(&ack) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Could not encode acknowledgement for {}: {}", callback.task_id, e);
                return;
            }
        };
        match self.send_with_retry(destination, &payload).await {
            Ok(response) if response.is_success() => {
                info!("Acknowledged empty postback for task {}", callback.task_id)
            }
            Ok(response) => warn!(
                "Acknowledgement for task {} answered {}",
                callback.task_id, response.status
            ),
            Err(e) => warn!("Acknowledgement for task {} failed: {}", callback.task_id, e),
        }
    }

    /// POST `payload`, backing off `base × 2^attempt` after each rate-limit
    /// response. Any other response is returned as-is for the caller to judge.
    pub async fn send_with_retry(&self, url: &str, payload: &Value) -> Result<HttpPostResult> {
        let attempts = self.settings.max_attempts;
        for attempt in 0..attempts {
            debug!("Attempt {}/{}: POST {}", attempt + 1, attempts, url);
            let response = self.webhook.post_json(url, payload).await?;
            if !response.is_rate_limited() {
                debug!("Response status: {}", response.status);
                return Ok(response);
            }
            if attempt + 1 == attempts {
                break;
            }
            let wait = self.settings.base_backoff * 2u32.saturating_pow(attempt);
            DeliveryMetrics::record_rate_limited_retry();
            warn!("Rate limited (429). Waiting {}ms before retry...", wait.as_millis());
            tokio::time::sleep(wait).await;
        }
        Err(RelayError::DeliveryExhausted { attempts })
    }
}
