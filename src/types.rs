use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One validated submission item, as accepted from the caller.
///
/// Fields the relay does not interpret are kept in `passthrough` and are
/// forwarded to the external task API untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskRequest {
    pub language_code: String,
    pub location_code: LocationCode,
    pub keyword: String,
    pub depth: serde_json::Number,
    pub postback_data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
    #[serde(flatten)]
    pub passthrough: Map<String, Value>,
}

/// Location codes arrive either as numbers or as strings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum LocationCode {
    Numeric(serde_json::Number),
    Text(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Completed,
    Failed,
}

/// Correlation state persisted under `task:<taskId>` at submission time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CorrelationRecord {
    pub task_id: String,
    pub status: TaskStatus,
    pub original_request: TaskRequest,
    pub correlation_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_index: Option<usize>,
}

/// What the caller gets back after a successful submission
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionReceipt {
    pub task_id: String,
    pub correlation_id: String,
}

/// Postback after decoding, validation and correlation lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedCallback {
    pub task_id: String,
    pub correlation_id: String,
    pub extra: Option<Value>,
    pub webhook_override: Option<String>,
    pub credential_index: Option<usize>,
    pub correlated: bool,
    pub location_code: Value,
    pub keyword: String,
    pub total_item_count: usize,
    pub unique_item_count: usize,
    pub items: Vec<Value>,
    /// Parsed callback with normalized items substituted in place
    pub raw_envelope: Value,
}

/// Outbound unit for one chunk of a postback's items
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryEnvelope {
    pub task_id: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub total_item_count: usize,
    pub unique_item_count: usize,
    pub payload_slice: Value,
    pub extra: Option<Value>,
}

/// Sent instead of chunk envelopes when a postback carries no items
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryAcknowledgement {
    pub task_id: String,
    pub total_chunks: usize,
    pub total_item_count: usize,
    pub unique_item_count: usize,
    pub message: String,
    pub extra: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    /// `None` only for an unacknowledged empty postback
    pub destination: Option<String>,
    pub total_chunks: usize,
    pub chunks_delivered: usize,
    pub acknowledgement_only: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_request_keeps_unknown_fields() {
        let raw = json!({
            "language_code": "en",
            "location_code": 2840,
            "keyword": "coffee",
            "depth": 100,
            "postback_data": "advanced",
            "device": "desktop",
            "extra": {"campaign": 7}
        });

        let request: TaskRequest = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(request.location_code, LocationCode::Numeric(2840.into()));
        assert_eq!(request.passthrough.get("device"), Some(&json!("desktop")));
        assert!(request.webhook.is_none());

        let back = serde_json::to_value(&request).unwrap();
        assert_eq!(back, raw);
    }

    #[test]
    fn test_string_location_code() {
        let request: TaskRequest = serde_json::from_value(json!({
            "language_code": "en",
            "location_code": "2840",
            "keyword": "coffee",
            "depth": 10,
            "postback_data": "advanced"
        }))
        .unwrap();
        assert_eq!(request.location_code, LocationCode::Text("2840".into()));
    }

    #[test]
    fn test_correlation_record_wire_shape() {
        let record = CorrelationRecord {
            task_id: "t-1".into(),
            status: TaskStatus::Pending,
            original_request: serde_json::from_value(json!({
                "language_code": "en",
                "location_code": 2840,
                "keyword": "coffee",
                "depth": 10,
                "postback_data": "advanced",
                "webhook": "https://example.com/hook"
            }))
            .unwrap(),
            correlation_id: "abc".into(),
            created_at: Utc::now(),
            credential_index: Some(0),
        };

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["status"], json!("pending"));
        assert_eq!(value["originalRequest"]["webhook"], json!("https://example.com/hook"));
        assert_eq!(value["correlationId"], json!("abc"));
    }
}
