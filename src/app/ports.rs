use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;

/// Client for the external asynchronous task API.
#[async_trait]
pub trait TaskApiPort: Send + Sync {
    /// Submit a task batch and return the API's parsed JSON response.
    async fn create_task(&self, batch: &Value) -> Result<Value>;
}

/// Outbound transport to destination webhooks.
#[async_trait]
pub trait WebhookPort: Send + Sync {
    async fn post_json(&self, url: &str, payload: &Value) -> Result<HttpPostResult>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpPostResult {
    pub status: u16,
    pub body: String,
}

impl HttpPostResult {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_rate_limited(&self) -> bool {
        self.status == 429
    }
}
