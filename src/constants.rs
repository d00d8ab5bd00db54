/// Store key prefixes shared by every store backend
pub const TASK_KEY_PREFIX: &str = "task:";
pub const RATE_LIMIT_KEY_PREFIX: &str = "ratelimit:";
pub const USAGE_KEY_PREFIX: &str = "api_calls:";

/// Literal the external task API expects for advanced postback delivery
pub const POSTBACK_MODE_ADVANCED: &str = "advanced";

/// Item field whose non-null values are counted as unique items
pub const ITEM_ID_FIELD: &str = "place_id";

// Delivery tuning
pub const MAX_ITEMS_PER_CALL: usize = 25;
pub const MAX_DELIVERY_ATTEMPTS: u32 = 10;
pub const BASE_BACKOFF_MS: u64 = 1000;

// Admission control defaults: 1000 requests per minute per client
pub const DEFAULT_RATE_LIMIT: usize = 1000;
pub const DEFAULT_RATE_WINDOW_SECS: u64 = 60;

/// Correlation records that are never claimed expire after a week
pub const DEFAULT_RECORD_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Header carrying the caller credential on submissions
pub const DEFAULT_CREDENTIAL_HEADER: &str = "authentication";

/// Prefix of environment variables holding valid credentials
pub const AUTH_TOKEN_ENV_PREFIX: &str = "AUTH_TOKEN_";

/// Upper bound for a decompressed postback body (64 MiB)
pub const MAX_DECOMPRESSED_BYTES: u64 = 64 * 1024 * 1024;

pub const DEFAULT_PORT: u16 = 3000;

/// Build the store key for a correlation record
pub fn task_key(task_id: &str) -> String {
    format!("{TASK_KEY_PREFIX}{task_id}")
}

/// Build the store key for a rate window
pub fn rate_limit_key(client_key: &str) -> String {
    format!("{RATE_LIMIT_KEY_PREFIX}{client_key}")
}

/// Submission counter for a credential identity
pub fn usage_submissions_key(identity: usize) -> String {
    format!("{USAGE_KEY_PREFIX}{identity}")
}

/// Correlation id log for a credential identity
pub fn usage_correlation_log_key(identity: usize) -> String {
    format!("{USAGE_KEY_PREFIX}{identity}:correlation_ids")
}

/// Processed chunk counter for a credential identity
pub fn usage_chunks_key(identity: usize) -> String {
    format!("{USAGE_KEY_PREFIX}{identity}:chunks")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_keys() {
        assert_eq!(task_key("0714abc"), "task:0714abc");
        assert_eq!(rate_limit_key("10.0.0.1"), "ratelimit:10.0.0.1");
        assert_eq!(usage_submissions_key(2), "api_calls:2");
        assert_eq!(usage_correlation_log_key(0), "api_calls:0:correlation_ids");
        assert_eq!(usage_chunks_key(1), "api_calls:1:chunks");
    }
}
