use crate::app::ports::TaskApiPort;
use crate::error::{RelayError, Result};
use crate::metrics::SubmissionMetrics;
use crate::relay::correlation::{generate_correlation_id, CorrelationStore};
use crate::relay::rate_limiter::RateLimiter;
use crate::relay::token_authority::TokenAuthority;
use crate::relay::usage::UsageCounter;
use crate::types::{CorrelationRecord, SubmissionReceipt, TaskRequest, TaskStatus};
use chrono::Utc;
use jsonschema::JSONSchema;
use once_cell::sync::Lazy;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

static REQUEST_SCHEMA_JSON: Lazy<Value> = Lazy::new(|| {
    serde_json::from_str(include_str!("../../schemas/task_request.v1.json"))
        .unwrap_or(Value::Null)
});

static REQUEST_SCHEMA: Lazy<std::result::Result<JSONSchema, String>> = Lazy::new(|| {
    JSONSchema::options()
        .compile(&REQUEST_SCHEMA_JSON)
        .map_err(|e| e.to_string())
});

/// Pull the single item out of a submission body.
///
/// Accepts a one-element array or an object keyed `"0"`; every other shape,
/// including multi-item batches, is rejected.
pub fn extract_single_item(body: &Value) -> Result<&Value> {
    match body {
        Value::Array(items) if items.len() == 1 => Ok(&items[0]),
        Value::Array(items) => Err(RelayError::InvalidRequest(format!(
            "expected exactly one item, got {}",
            items.len()
        ))),
        Value::Object(map) => map.get("0").ok_or_else(|| {
            RelayError::InvalidRequest(
                "body is not an array with one item or an object with a \"0\" key".to_string(),
            )
        }),
        _ => Err(RelayError::InvalidRequest(
            "body is not an array with one item or an object with a \"0\" key".to_string(),
        )),
    }
}

/// Check one item against the request schema and type it.
pub fn validate_item(item: &Value) -> Result<TaskRequest> {
    let schema = REQUEST_SCHEMA
        .as_ref()
        .map_err(|e| RelayError::Config(format!("request schema failed to compile: {e}")))?;

    if let Err(errors) = schema.validate(item) {
        let details: Vec<String> = errors
            .map(|e| format!("{}: {}", e.instance_path, e))
            .collect();
        debug!("Invalid fields: {:?}", details);
        return Err(RelayError::InvalidRequest(details.join("; ")));
    }

    let request: TaskRequest = serde_json::from_value(item.clone())
        .map_err(|e| RelayError::InvalidRequest(e.to_string()))?;
    if let Some(extra) = &request.extra {
        debug!("Extra data: {}", extra);
    }
    Ok(request)
}

/// Validate a raw submission body down to its single typed request
pub fn parse_request_body(body: &Value) -> Result<TaskRequest> {
    validate_item(extract_single_item(body)?)
}

/// Validates submissions, creates the external task and persists the
/// correlation state its postback will need.
pub struct TaskSubmitter {
    authority: Arc<TokenAuthority>,
    limiter: Arc<RateLimiter>,
    correlations: Arc<CorrelationStore>,
    usage: Arc<UsageCounter>,
    task_api: Arc<dyn TaskApiPort>,
    base_postback_url: String,
}

impl TaskSubmitter {
    pub fn new(
        authority: Arc<TokenAuthority>,
        limiter: Arc<RateLimiter>,
        correlations: Arc<CorrelationStore>,
        usage: Arc<UsageCounter>,
        task_api: Arc<dyn TaskApiPort>,
        base_postback_url: impl Into<String>,
    ) -> Self {
        Self {
            authority,
            limiter,
            correlations,
            usage,
            task_api,
            base_postback_url: base_postback_url.into(),
        }
    }

    pub fn postback_url(&self, correlation_id: &str) -> String {
        format!("{}{}", self.base_postback_url, correlation_id)
    }

    #[instrument(skip(self, body, credential))]
    pub async fn submit(
        &self,
        body: &Value,
        credential: Option<&str>,
        client_key: &str,
    ) -> Result<SubmissionReceipt> {
        let outcome = self.try_submit(body, credential, client_key).await;
        match &outcome {
            Ok(receipt) => {
                SubmissionMetrics::record_accepted();
                info!(
                    task_id = %receipt.task_id,
                    correlation_id = %receipt.correlation_id,
                    "Task submitted"
                );
            }
            Err(e) => {
                SubmissionMetrics::record_rejected(e.kind());
                warn!(reason = e.kind(), "Submission rejected: {}", e);
            }
        }
        outcome
    }

    async fn try_submit(
        &self,
        body: &Value,
        credential: Option<&str>,
        client_key: &str,
    ) -> Result<SubmissionReceipt> {
        let identity = credential
            .and_then(|c| self.authority.identity_of(c))
            .ok_or(RelayError::Unauthorized)?;

        if !self.admit(client_key).await {
            return Err(RelayError::RateLimited);
        }

        let request = parse_request_body(body)?;
        let correlation_id = generate_correlation_id();
        let task_id = self.create_task(&request, &correlation_id).await?;

        let record = CorrelationRecord {
            task_id: task_id.clone(),
            status: TaskStatus::Pending,
            original_request: request,
            correlation_id: correlation_id.clone(),
            created_at: Utc::now(),
            credential_index: Some(identity),
        };
        self.correlations.save(&record).await?;

        self.usage.record_submission(identity, &correlation_id).await;

        Ok(SubmissionReceipt {
            task_id,
            correlation_id,
        })
    }

    /// Store trouble while rate limiting admits the request
    async fn admit(&self, client_key: &str) -> bool {
        match self.limiter.allow(client_key).await {
            Ok(allowed) => allowed,
            Err(e) => {
                error!("Rate limiter unavailable for {}, admitting: {}", client_key, e);
                true
            }
        }
    }

    async fn create_task(&self, request: &TaskRequest, correlation_id: &str) -> Result<String> {
        let mut item = serde_json::to_value(request)?;
        if let Value::Object(map) = &mut item {
            map.insert(
                "postback_url".to_string(),
                Value::String(self.postback_url(correlation_id)),
            );
        }
        let batch = Value::Array(vec![item]);

        let response = self.task_api.create_task(&batch).await.map_err(|e| match e {
            RelayError::UpstreamTaskCreationFailed(_) => e,
            other => RelayError::UpstreamTaskCreationFailed(other.to_string()),
        })?;

        first_task_id(&response).ok_or_else(|| {
            let detail = response
                .get("status_message")
                .and_then(Value::as_str)
                .unwrap_or("no task id in response");
            RelayError::UpstreamTaskCreationFailed(format!(
                "No task ID received from API ({detail})"
            ))
        })
    }
}

fn first_task_id(response: &Value) -> Option<String> {
    response
        .get("tasks")?
        .as_array()?
        .first()?
        .get("id")?
        .as_str()
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}
