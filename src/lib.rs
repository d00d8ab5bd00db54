pub mod config;
pub mod constants;
#[cfg(feature = "db")]
pub mod db;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod relay;
pub mod server;
pub mod storage;
pub mod types;

// Ports and their HTTP adapters
pub mod app;
pub mod infra;
