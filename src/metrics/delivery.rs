//! Postback and delivery phase metrics.

use crate::metrics::{phase_metric, MetricDoc, MetricType, PhaseMetrics};

pub struct DeliveryMetrics;

impl DeliveryMetrics {
    pub fn record_postback_received() {
        ::metrics::counter!(phase_metric!(counter, "delivery", "postbacks_received")).increment(1);
    }

    pub fn record_postback_malformed() {
        ::metrics::counter!(phase_metric!(counter, "delivery", "postbacks_malformed")).increment(1);
    }

    pub fn record_chunk_delivered() {
        ::metrics::counter!(phase_metric!(counter, "delivery", "chunks_delivered")).increment(1);
    }

    pub fn record_rate_limited_retry() {
        ::metrics::counter!(phase_metric!(counter, "delivery", "retries")).increment(1);
    }

    pub fn record_failure() {
        ::metrics::counter!(phase_metric!(counter, "delivery", "failures")).increment(1);
    }

    pub fn record_duration(secs: f64) {
        ::metrics::histogram!(phase_metric!(histogram, "delivery", "duration_seconds")).record(secs);
    }
}

impl PhaseMetrics for DeliveryMetrics {
    fn register_metrics() {
        for doc in Self::metrics_documentation() {
            match doc.metric_type {
                MetricType::Counter => ::metrics::describe_counter!(doc.name, doc.help),
                MetricType::Histogram => ::metrics::describe_histogram!(doc.name, doc.help),
            }
        }
    }

    fn phase_name() -> &'static str {
        "delivery"
    }

    fn metrics_documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: phase_metric!(counter, "delivery", "postbacks_received"),
                metric_type: MetricType::Counter,
                help: "Postbacks received from the task API",
            },
            MetricDoc {
                name: phase_metric!(counter, "delivery", "postbacks_malformed"),
                metric_type: MetricType::Counter,
                help: "Postbacks rejected as malformed",
            },
            MetricDoc {
                name: phase_metric!(counter, "delivery", "chunks_delivered"),
                metric_type: MetricType::Counter,
                help: "Chunk envelopes accepted by destination webhooks",
            },
            MetricDoc {
                name: phase_metric!(counter, "delivery", "retries"),
                metric_type: MetricType::Counter,
                help: "Webhook calls retried after a rate-limit response",
            },
            MetricDoc {
                name: phase_metric!(counter, "delivery", "failures"),
                metric_type: MetricType::Counter,
                help: "Postback deliveries that failed or exhausted retries",
            },
            MetricDoc {
                name: phase_metric!(histogram, "delivery", "duration_seconds"),
                metric_type: MetricType::Histogram,
                help: "Wall time to deliver every chunk of one postback",
            },
        ]
    }
}
