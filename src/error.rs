use axum::http::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Unauthorized: invalid or missing token")]
    Unauthorized,

    #[error("Rate limit exceeded. Please try again later.")]
    RateLimited,

    #[error("Invalid request body: {0}")]
    InvalidRequest(String),

    #[error("Task creation failed upstream: {0}")]
    UpstreamTaskCreationFailed(String),

    #[error("Malformed postback payload: {0}")]
    MalformedPayload(String),

    #[error("Webhook delivery failed for chunk {chunk_index}: {reason}")]
    DeliveryFailed { chunk_index: usize, reason: String },

    #[error("Too many requests, even after {attempts} attempts")]
    DeliveryExhausted { attempts: u32 },

    #[error("No destination webhook configured for task {task_id}")]
    MissingDestination { task_id: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),
}

impl RelayError {
    /// HTTP status surfaced to whoever triggered the failing operation.
    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::Unauthorized => StatusCode::UNAUTHORIZED,
            RelayError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            RelayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::Unauthorized => "unauthorized",
            RelayError::RateLimited => "rate_limited",
            RelayError::InvalidRequest(_) => "invalid_request",
            RelayError::UpstreamTaskCreationFailed(_) => "upstream_task_creation_failed",
            RelayError::MalformedPayload(_) => "malformed_payload",
            RelayError::DeliveryFailed { .. } => "delivery_failed",
            RelayError::DeliveryExhausted { .. } => "delivery_exhausted",
            RelayError::MissingDestination { .. } => "missing_destination",
            RelayError::Http(_) => "http",
            RelayError::Json(_) => "json",
            RelayError::Toml(_) => "toml",
            RelayError::Io(_) => "io",
            RelayError::Config(_) => "config",
            RelayError::Store(_) => "store",
        }
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_follow_error_taxonomy() {
        assert_eq!(RelayError::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(RelayError::RateLimited.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            RelayError::InvalidRequest("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            RelayError::UpstreamTaskCreationFailed("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            RelayError::MalformedPayload("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            RelayError::DeliveryExhausted { attempts: 10 }.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
