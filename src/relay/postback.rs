use crate::constants::{ITEM_ID_FIELD, MAX_DECOMPRESSED_BYTES};
use crate::error::{RelayError, Result};
use crate::metrics::DeliveryMetrics;
use crate::relay::correlation::CorrelationStore;
use crate::relay::work_hours::normalize_work_hours;
use crate::types::{CorrelationRecord, NormalizedCallback};
use axum::http::header::CONTENT_ENCODING;
use axum::http::HeaderMap;
use flate2::read::GzDecoder;
use serde_json::Value;
use std::io::Read;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Decode a postback body, honouring a gzip content encoding.
pub fn decode_body(raw_body: &[u8], headers: &HeaderMap) -> Result<Vec<u8>> {
    let gzipped = headers
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            let v = v.trim().to_ascii_lowercase();
            v == "gzip" || v == "x-gzip"
        })
        .unwrap_or(false);
    if !gzipped {
        return Ok(raw_body.to_vec());
    }

    let mut decompressed = Vec::new();
    GzDecoder::new(raw_body)
        .take(MAX_DECOMPRESSED_BYTES + 1)
        .read_to_end(&mut decompressed)
        .map_err(|e| RelayError::MalformedPayload(format!("gzip decompression failed: {e}")))?;
    if decompressed.len() as u64 > MAX_DECOMPRESSED_BYTES {
        return Err(RelayError::MalformedPayload(format!(
            "decompressed body exceeds {MAX_DECOMPRESSED_BYTES} bytes"
        )));
    }
    Ok(decompressed)
}

fn is_present(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Number(n)) => n.as_f64() != Some(0.0),
        Some(_) => true,
    }
}

/// Minimal fields pulled from the first task of a callback envelope
struct GeneralData {
    task_id: Option<String>,
    location_code: Value,
    keyword: String,
    items: Option<Vec<Value>>,
}

fn extract_general_data(envelope: &Value) -> Result<GeneralData> {
    let task = envelope
        .get("tasks")
        .and_then(Value::as_array)
        .and_then(|tasks| tasks.first())
        .ok_or_else(|| {
            RelayError::MalformedPayload("missing or empty tasks array".to_string())
        })?;
    let data = task
        .get("data")
        .filter(|d| d.is_object())
        .ok_or_else(|| RelayError::MalformedPayload("task is missing data".to_string()))?;

    let location_code = data.get("location_code");
    let keyword = data.get("keyword");
    if !is_present(location_code) || !is_present(keyword) {
        return Err(RelayError::MalformedPayload(
            "missing required data: location_code or keyword".to_string(),
        ));
    }
    let keyword = match keyword {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    };

    let items = task
        .get("result")
        .and_then(Value::as_array)
        .and_then(|results| results.first())
        .and_then(|result| result.get("items"))
        .and_then(Value::as_array)
        .cloned();

    Ok(GeneralData {
        task_id: task.get("id").and_then(Value::as_str).map(str::to_string),
        location_code: location_code.cloned().unwrap_or(Value::Null),
        keyword,
        items,
    })
}

/// Replace `tasks[0].result[0].items` in a copy of `envelope`
pub fn with_items(envelope: &Value, items: Vec<Value>) -> Value {
    let mut copy = envelope.clone();
    if let Some(slot) = copy
        .get_mut("tasks")
        .and_then(|tasks| tasks.get_mut(0))
        .and_then(|task| task.get_mut("result"))
        .and_then(|results| results.get_mut(0))
        .and_then(Value::as_object_mut)
    {
        slot.insert("items".to_string(), Value::Array(items));
    }
    copy
}

/// Items whose identifying field is non-null. Duplicates are counted, not merged.
pub fn count_identified(items: &[Value]) -> usize {
    items
        .iter()
        .filter(|item| item.get(ITEM_ID_FIELD).map_or(false, |id| !id.is_null()))
        .count()
}

/// Turns a raw postback into a `NormalizedCallback`. Never mutates
/// correlation state.
pub struct PostbackIngestor {
    correlations: Arc<CorrelationStore>,
}

impl PostbackIngestor {
    pub fn new(correlations: Arc<CorrelationStore>) -> Self {
        Self { correlations }
    }

    /// `id` is the path segment the callback arrived on: the correlation id
    /// this relay appended to the postback URL, or the task id itself.
    #[instrument(skip(self, raw_body, headers), fields(bytes = raw_body.len()))]
    pub async fn ingest(
        &self,
        id: &str,
        raw_body: &[u8],
        headers: &HeaderMap,
    ) -> Result<NormalizedCallback> {
        DeliveryMetrics::record_postback_received();
        let outcome = self.try_ingest(id, raw_body, headers).await;
        if let Err(e) = &outcome {
            DeliveryMetrics::record_postback_malformed();
            error!("Rejecting postback {}: {}", id, e);
        }
        outcome
    }

    async fn try_ingest(
        &self,
        id: &str,
        raw_body: &[u8],
        headers: &HeaderMap,
    ) -> Result<NormalizedCallback> {
        let body = decode_body(raw_body, headers)?;
        let envelope: Value = serde_json::from_slice(&body)
            .map_err(|e| RelayError::MalformedPayload(format!("body is not valid JSON: {e}")))?;
        info!("Received postback data for {}", id);

        let general = extract_general_data(&envelope)?;
        let task_id = general.task_id.clone().unwrap_or_else(|| id.to_string());
        let record = self.lookup(&task_id, id).await;

        let (items, raw_envelope) = match general.items {
            Some(items) => {
                let items: Vec<Value> = items.into_iter().map(normalize_work_hours).collect();
                let raw_envelope = with_items(&envelope, items.clone());
                (items, raw_envelope)
            }
            None => {
                info!("No items found in the result for task {}", task_id);
                (Vec::new(), envelope)
            }
        };

        let callback = NormalizedCallback {
            correlation_id: record
                .as_ref()
                .map(|r| r.correlation_id.clone())
                .unwrap_or_else(|| id.to_string()),
            extra: record.as_ref().and_then(|r| r.original_request.extra.clone()),
            webhook_override: record.as_ref().and_then(|r| r.original_request.webhook.clone()),
            credential_index: record.as_ref().and_then(|r| r.credential_index),
            correlated: record.is_some(),
            task_id,
            location_code: general.location_code,
            keyword: general.keyword,
            total_item_count: items.len(),
            unique_item_count: count_identified(&items),
            items,
            raw_envelope,
        };
        debug!(
            total = callback.total_item_count,
            unique = callback.unique_item_count,
            correlated = callback.correlated,
            "Postback normalized"
        );
        Ok(callback)
    }

    /// A lookup failure or mismatch degrades to "no correlation" rather than
    /// failing the postback.
    async fn lookup(&self, task_id: &str, path_id: &str) -> Option<CorrelationRecord> {
        let record = match self.correlations.load(task_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!("No correlation record for task {}", task_id);
                return None;
            }
            Err(e) => {
                error!("Error retrieving original task data for {}: {}", task_id, e);
                return None;
            }
        };
        if path_id != record.correlation_id && path_id != record.task_id {
            warn!(
                "Postback path id {} does not match correlation {} of task {}; ignoring record",
                path_id, record.correlation_id, task_id
            );
            return None;
        }
        Some(record)
    }
}
