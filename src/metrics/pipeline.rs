//! Match-and-insert and index metrics.

use crate::metrics::{phase_metric, MetricDoc, MetricType, PhaseMetrics};

pub struct PipelineMetrics;

impl PipelineMetrics {
    pub fn record_match(decision: &'static str) {
        ::metrics::counter!(phase_metric!(counter, "pipeline", "match_decisions"), "decision" => decision)
            .increment(1);
    }

    pub fn record_period_ingested(cells: usize) {
        ::metrics::counter!(phase_metric!(counter, "pipeline", "periods_ingested")).increment(1);
        ::metrics::counter!(phase_metric!(counter, "pipeline", "cells_inserted")).increment(cells as u64);
    }

    pub fn record_period_gap() {
        ::metrics::counter!(phase_metric!(counter, "pipeline", "period_gaps")).increment(1);
    }

    pub fn record_index_points(points: usize, low_confidence: usize) {
        ::metrics::gauge!(phase_metric!(gauge, "pipeline", "index_points")).set(points as f64);
        ::metrics::gauge!(phase_metric!(gauge, "pipeline", "low_confidence_points")).set(low_confidence as f64);
    }
}

impl PhaseMetrics for PipelineMetrics {
    fn register_metrics() {
        use metrics::{counter, gauge};

        let _ = counter!(phase_metric!(counter, "pipeline", "match_decisions"));
        let _ = counter!(phase_metric!(counter, "pipeline", "periods_ingested"));
        let _ = counter!(phase_metric!(counter, "pipeline", "cells_inserted"));
        let _ = counter!(phase_metric!(counter, "pipeline", "period_gaps"));
        let _ = gauge!(phase_metric!(gauge, "pipeline", "index_points"));
        let _ = gauge!(phase_metric!(gauge, "pipeline", "low_confidence_points"));
    }

    fn phase_name() -> &'static str {
        "pipeline"
    }

    fn metrics_documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: phase_metric!(counter, "pipeline", "match_decisions"),
                metric_type: MetricType::Counter,
                help: "Item matcher outcomes, by decision",
            },
            MetricDoc {
                name: phase_metric!(counter, "pipeline", "periods_ingested"),
                metric_type: MetricType::Counter,
                help: "Periods whose cells were committed to the panel",
            },
            MetricDoc {
                name: phase_metric!(counter, "pipeline", "cells_inserted"),
                metric_type: MetricType::Counter,
                help: "Panel cells inserted",
            },
            MetricDoc {
                name: phase_metric!(counter, "pipeline", "period_gaps"),
                metric_type: MetricType::Counter,
                help: "Periods recorded as gaps",
            },
            MetricDoc {
                name: phase_metric!(gauge, "pipeline", "index_points"),
                metric_type: MetricType::Gauge,
                help: "Index points in the latest computation",
            },
            MetricDoc {
                name: phase_metric!(gauge, "pipeline", "low_confidence_points"),
                metric_type: MetricType::Gauge,
                help: "Low-confidence index points in the latest computation",
            },
        ]
    }
}
