use crate::constants::{
    BASE_BACKOFF_MS, DEFAULT_CREDENTIAL_HEADER, DEFAULT_PORT, DEFAULT_RATE_LIMIT,
    DEFAULT_RATE_WINDOW_SECS, DEFAULT_RECORD_TTL_SECS, MAX_DELIVERY_ATTEMPTS, MAX_ITEMS_PER_CALL,
};
use crate::error::{RelayError, Result};
use crate::relay::DeliverySettings;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

const DEFAULT_CONFIG_PATH: &str = "relay.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub rate_limit: RateLimitConfig,
    pub delivery: DeliveryConfig,
    pub correlation: CorrelationConfig,
    pub endpoints: EndpointsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub credential_header: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            credential_header: DEFAULT_CREDENTIAL_HEADER.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub limit: usize,
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: DEFAULT_RATE_LIMIT,
            window_secs: DEFAULT_RATE_WINDOW_SECS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub max_items_per_call: usize,
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_items_per_call: MAX_ITEMS_PER_CALL,
            max_attempts: MAX_DELIVERY_ATTEMPTS,
            base_backoff_ms: BASE_BACKOFF_MS,
        }
    }
}

impl DeliveryConfig {
    pub fn settings(&self) -> DeliverySettings {
        DeliverySettings {
            max_items_per_call: self.max_items_per_call.max(1),
            max_attempts: self.max_attempts.max(1),
            base_backoff: Duration::from_millis(self.base_backoff_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    pub record_ttl_secs: u64,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            record_ttl_secs: DEFAULT_RECORD_TTL_SECS,
        }
    }
}

/// Endpoints and secrets; normally supplied through the environment
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EndpointsConfig {
    pub task_api_url: Option<String>,
    pub task_api_login: Option<String>,
    pub task_api_password: Option<String>,
    pub base_postback_url: Option<String>,
    pub webhook_url: Option<String>,
}

/// Task API client settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskApiEndpoint {
    pub url: String,
    pub login: String,
    pub password: String,
}

impl Config {
    /// Read `RELAY_CONFIG` (or `relay.toml`) if present, then apply
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let path = std::env::var("RELAY_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = Self::from_file_or_default(Path::new(&path))?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|e| {
            RelayError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;
        let config: Config = toml::from_str(&content)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Overlay environment values; `lookup` abstracts `std::env::var`
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = non_empty("TASK_API_URL") {
            self.endpoints.task_api_url = Some(v);
        }
        if let Some(v) = non_empty("TASK_API_LOGIN") {
            self.endpoints.task_api_login = Some(v);
        }
        if let Some(v) = non_empty("TASK_API_PASSWORD") {
            self.endpoints.task_api_password = Some(v);
        }
        if let Some(v) = non_empty("BASE_POSTBACK_URL") {
            self.endpoints.base_postback_url = Some(v);
        }
        if let Some(v) = non_empty("WEBHOOK_URL") {
            self.endpoints.webhook_url = Some(v);
        }
        if let Some(v) = non_empty("PORT") {
            match v.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => warn!("Ignoring invalid PORT value '{}'", v),
            }
        }
    }

    /// Fails unless every endpoint `serve` needs is set, `BASE_POSTBACK_URL`
    /// included; that one is read from `endpoints` by the server state.
    pub fn task_api_endpoint(&self) -> Result<TaskApiEndpoint> {
        let e = &self.endpoints;
        let missing: Vec<&str> = [
            ("TASK_API_URL", &e.task_api_url),
            ("TASK_API_LOGIN", &e.task_api_login),
            ("TASK_API_PASSWORD", &e.task_api_password),
            ("BASE_POSTBACK_URL", &e.base_postback_url),
        ]
        .iter()
        .filter(|(_, v)| v.is_none())
        .map(|(name, _)| *name)
        .collect();
        if !missing.is_empty() {
            return Err(RelayError::Config(format!(
                "missing required settings: {}",
                missing.join(", ")
            )));
        }
        Ok(TaskApiEndpoint {
            url: e.task_api_url.clone().unwrap_or_default(),
            login: e.task_api_login.clone().unwrap_or_default(),
            password: e.task_api_password.clone().unwrap_or_default(),
        })
    }

    pub fn rate_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit.window_secs)
    }

    pub fn record_ttl(&self) -> Duration {
        Duration::from_secs(self.correlation.record_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.rate_limit.limit, 1000);
        assert_eq!(config.rate_window(), Duration::from_secs(60));
        assert_eq!(config.delivery.settings().max_items_per_call, 25);
        assert_eq!(config.delivery.settings().max_attempts, 10);
        assert_eq!(config.server.credential_header, "authentication");
    }

    #[test]
    fn test_file_then_env_overlay() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[server]
port = 8080

[rate_limit]
limit = 5

[endpoints]
task_api_url = "https://api.example.com/v3/task_post"
webhook_url = "https://hooks.example.com/from-file"
"#
        )
        .unwrap();

        let mut config = Config::from_file_or_default(file.path()).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.rate_limit.limit, 5);
        assert_eq!(config.rate_limit.window_secs, 60);

        let env: HashMap<&str, &str> = [
            ("TASK_API_LOGIN", "login"),
            ("TASK_API_PASSWORD", "pw"),
            ("BASE_POSTBACK_URL", "https://relay.example.com/api/postback/"),
            ("WEBHOOK_URL", "https://hooks.example.com/from-env"),
            ("PORT", "not-a-port"),
        ]
        .into_iter()
        .collect();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.server.port, 8080);
        assert_eq!(
            config.endpoints.webhook_url.as_deref(),
            Some("https://hooks.example.com/from-env")
        );
        let endpoint = config.task_api_endpoint().unwrap();
        assert_eq!(endpoint.url, "https://api.example.com/v3/task_post");
        assert_eq!(endpoint.login, "login");
    }

    #[test]
    fn test_missing_endpoints_are_reported() {
        let err = Config::default().task_api_endpoint().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("TASK_API_URL"));
        assert!(msg.contains("BASE_POSTBACK_URL"));
    }

    #[test]
    fn test_missing_file_means_defaults() {
        let config = Config::from_file_or_default(Path::new("/nonexistent/relay.toml")).unwrap();
        assert_eq!(config.server.port, DEFAULT_PORT);
    }
}
