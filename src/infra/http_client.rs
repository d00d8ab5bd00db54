use crate::app::ports::{HttpPostResult, TaskApiPort, WebhookPort};
use crate::error::{RelayError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

fn build_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?)
}

/// Task API client authenticating with HTTP Basic credentials.
pub struct ReqwestTaskApi {
    client: reqwest::Client,
    url: String,
    login: String,
    password: String,
}

impl ReqwestTaskApi {
    pub fn new(url: impl Into<String>, login: impl Into<String>, password: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            url: url.into(),
            login: login.into(),
            password: password.into(),
        })
    }
}

#[async_trait]
impl TaskApiPort for ReqwestTaskApi {
    async fn create_task(&self, batch: &Value) -> Result<Value> {
        let resp = self
            .client
            .post(&self.url)
            .basic_auth(&self.login, Some(&self.password))
            .json(batch)
            .send()
            .await?;
        let status = resp.status();
        let body: Value = resp.json().await.map_err(|e| {
            RelayError::UpstreamTaskCreationFailed(format!(
                "task API answered {status} with an unreadable body: {e}"
            ))
        })?;
        info!("Task API responded with status {}", status);
        debug!("Task API response: {}", body);
        Ok(body)
    }
}

/// Plain JSON POSTs to destination webhooks; no authentication is added.
pub struct ReqwestWebhook {
    client: reqwest::Client,
}

impl ReqwestWebhook {
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: build_client()?,
        })
    }
}

#[async_trait]
impl WebhookPort for ReqwestWebhook {
    async fn post_json(&self, url: &str, payload: &Value) -> Result<HttpPostResult> {
        let resp = self.client.post(url).json(payload).send().await?;
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        debug!("Webhook {} answered {} ({} bytes)", url, status, body.len());
        Ok(HttpPostResult { status, body })
    }
}
