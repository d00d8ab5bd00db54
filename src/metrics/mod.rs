//! Metrics for the relay, organised by phase.
//!
//! Each phase owns its metric names in a dedicated submodule; the Prometheus
//! recorder is installed once per process and rendered by the `/metrics`
//! route.

pub mod delivery;
pub mod registry;
pub mod submission;

pub use delivery::DeliveryMetrics;
pub use submission::SubmissionMetrics;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use tracing::{info, warn};

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder and register every phase's metrics.
///
/// Idempotent; later calls return the handle from the first one. Returns
/// `None` when another recorder already owns the global slot.
pub fn init_metrics() -> Option<&'static PrometheusHandle> {
    if let Some(handle) = HANDLE.get() {
        return Some(handle);
    }
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            let handle = HANDLE.get_or_init(|| handle);
            registry::register_all_metrics();
            info!("Prometheus recorder installed");
            Some(handle)
        }
        Err(e) => {
            warn!("Failed to install Prometheus recorder: {}", e);
            HANDLE.get()
        }
    }
}

/// Prometheus text for the current process, empty before `init_metrics`
pub fn render() -> String {
    HANDLE.get().map(|h| h.render()).unwrap_or_default()
}

/// Trait for phase-specific metrics collections
pub trait PhaseMetrics {
    /// Describe every metric of the phase to the recorder
    fn register_metrics();

    fn phase_name() -> &'static str;

    fn metrics_documentation() -> Vec<MetricDoc>;
}

#[derive(Debug, Clone)]
pub struct MetricDoc {
    pub name: &'static str,
    pub metric_type: MetricType,
    pub help: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Histogram,
}

/// Metric names follow `relay_{phase}_{name}` with a `_total` suffix on counters
macro_rules! phase_metric {
    (counter, $phase:literal, $name:literal) => {
        concat!("relay_", $phase, "_", $name, "_total")
    };
    (histogram, $phase:literal, $name:literal) => {
        concat!("relay_", $phase, "_", $name)
    };
}

pub(crate) use phase_metric;
