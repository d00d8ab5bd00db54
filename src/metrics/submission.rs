//! Submission phase metrics: admission, validation and task creation.

use crate::metrics::{phase_metric, MetricDoc, MetricType, PhaseMetrics};

pub struct SubmissionMetrics;

impl SubmissionMetrics {
    pub fn record_accepted() {
        ::metrics::counter!(phase_metric!(counter, "submission", "accepted")).increment(1);
    }

    /// `reason` is the error kind that rejected the submission
    pub fn record_rejected(reason: &'static str) {
        ::metrics::counter!(phase_metric!(counter, "submission", "rejected"), "reason" => reason)
            .increment(1);
    }

    pub fn record_usage_failure() {
        ::metrics::counter!(phase_metric!(counter, "submission", "usage_failures")).increment(1);
    }
}

impl PhaseMetrics for SubmissionMetrics {
    fn register_metrics() {
        for doc in Self::metrics_documentation() {
            match doc.metric_type {
                MetricType::Counter => ::metrics::describe_counter!(doc.name, doc.help),
                MetricType::Histogram => ::metrics::describe_histogram!(doc.name, doc.help),
            }
        }
    }

    fn phase_name() -> &'static str {
        "submission"
    }

    fn metrics_documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: phase_metric!(counter, "submission", "accepted"),
                metric_type: MetricType::Counter,
                help: "Submissions relayed to the task API and correlated",
            },
            MetricDoc {
                name: phase_metric!(counter, "submission", "rejected"),
                metric_type: MetricType::Counter,
                help: "Submissions rejected, labelled by reason",
            },
            MetricDoc {
                name: phase_metric!(counter, "submission", "usage_failures"),
                metric_type: MetricType::Counter,
                help: "Usage accounting writes that failed and were skipped",
            },
        ]
    }
}
