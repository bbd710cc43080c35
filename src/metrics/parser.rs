//! Parser Phase Metrics
//!
//! Documents parsed, observations extracted, review rows, and failures by
//! reason.

use crate::metrics::{phase_metric, MetricDoc, MetricType, PhaseMetrics};

/// Metrics collection for the Parser phase
pub struct ParserMetrics;

impl ParserMetrics {
    /// Record a successfully parsed document
    pub fn record_parse_success(observations: usize, review_rows: usize, duration_secs: f64) {
        ::metrics::counter!(phase_metric!(counter, "parser", "documents_parsed")).increment(1);
        ::metrics::counter!(phase_metric!(counter, "parser", "observations_extracted"))
            .increment(observations as u64);
        ::metrics::counter!(phase_metric!(counter, "parser", "review_rows")).increment(review_rows as u64);
        ::metrics::histogram!(phase_metric!(histogram, "parser", "duration_seconds")).record(duration_secs);
    }

    /// Record the layout a document was fingerprinted as
    pub fn record_layout_matched(layout: &'static str) {
        ::metrics::counter!(phase_metric!(counter, "parser", "layout_matches"), "layout" => layout).increment(1);
    }

    /// Record a document that failed to parse
    pub fn record_parse_error(reason: &'static str) {
        ::metrics::counter!(phase_metric!(counter, "parser", "errors"), "reason" => reason).increment(1);
    }
}

impl PhaseMetrics for ParserMetrics {
    fn register_metrics() {
        use metrics::{counter, histogram};

        let _ = counter!(phase_metric!(counter, "parser", "documents_parsed"));
        let _ = counter!(phase_metric!(counter, "parser", "layout_matches"));
        let _ = counter!(phase_metric!(counter, "parser", "observations_extracted"));
        let _ = counter!(phase_metric!(counter, "parser", "review_rows"));
        let _ = counter!(phase_metric!(counter, "parser", "errors"));
        let _ = histogram!(phase_metric!(histogram, "parser", "duration_seconds"));
    }

    fn phase_name() -> &'static str {
        "parser"
    }

    fn metrics_documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: phase_metric!(counter, "parser", "documents_parsed"),
                metric_type: MetricType::Counter,
                help: "Documents successfully parsed",
            },
            MetricDoc {
                name: phase_metric!(counter, "parser", "layout_matches"),
                metric_type: MetricType::Counter,
                help: "Documents fingerprinted as a known layout, by layout",
            },
            MetricDoc {
                name: phase_metric!(counter, "parser", "observations_extracted"),
                metric_type: MetricType::Counter,
                help: "Line items extracted from documents",
            },
            MetricDoc {
                name: phase_metric!(counter, "parser", "review_rows"),
                metric_type: MetricType::Counter,
                help: "Line items with tokens outside the price/unit grammar",
            },
            MetricDoc {
                name: phase_metric!(counter, "parser", "errors"),
                metric_type: MetricType::Counter,
                help: "Documents that failed to parse, by reason",
            },
            MetricDoc {
                name: phase_metric!(histogram, "parser", "duration_seconds"),
                metric_type: MetricType::Histogram,
                help: "Time spent parsing one document",
            },
        ]
    }
}
