//! Registration of every phase's metrics, with conflict detection.

use crate::metrics::{DeliveryMetrics, MetricDoc, PhaseMetrics, SubmissionMetrics};
use std::collections::HashMap;
use tracing::{info, warn};

pub fn register_all_metrics() {
    let mut all_metrics = HashMap::new();

    register_phase_metrics::<SubmissionMetrics>(&mut all_metrics);
    register_phase_metrics::<DeliveryMetrics>(&mut all_metrics);

    info!("Registered {} total metrics across all phases", all_metrics.len());
}

fn register_phase_metrics<T: PhaseMetrics>(all_metrics: &mut HashMap<&'static str, MetricDoc>) {
    T::register_metrics();
    for doc in T::metrics_documentation() {
        if all_metrics.contains_key(doc.name) {
            warn!(
                "Metric name conflict detected: '{}' redefined by phase '{}'",
                doc.name,
                T::phase_name()
            );
        }
        all_metrics.insert(doc.name, doc);
    }
}
