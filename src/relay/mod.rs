//! The asynchronous task relay core.
//!
//! Submission: `TokenAuthority` → `RateLimiter` → `TaskSubmitter` (task API
//! call, correlation record, usage accounting). Completion, later and out of
//! band: `PostbackIngestor` → `DeliveryEngine` → destination webhook.

pub mod correlation;
pub mod delivery;
pub mod postback;
pub mod rate_limiter;
pub mod submitter;
pub mod token_authority;
pub mod usage;
pub mod work_hours;

pub use correlation::{generate_correlation_id, CorrelationStore};
pub use delivery::{DeliveryEngine, DeliverySettings};
pub use postback::PostbackIngestor;
pub use rate_limiter::RateLimiter;
pub use submitter::TaskSubmitter;
pub use token_authority::TokenAuthority;
pub use usage::{UsageCounter, UsageSnapshot};
