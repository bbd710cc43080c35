//! Phase-organized metrics for the commissary pipeline
//!
//! Metrics go through the `metrics` facade only. The library never installs a
//! recorder; a binary embedding the pipeline installs whichever exporter it
//! wants, and until then every call here is a no-op.

pub mod parser;
pub mod pipeline;

pub use parser::ParserMetrics;
pub use pipeline::PipelineMetrics;

/// Trait for phase-specific metrics collections
pub trait PhaseMetrics {
    /// Register all metrics for this phase so they show up before first use
    fn register_metrics();

    /// Get the phase name for prefixing metrics
    fn phase_name() -> &'static str;

    /// Get documentation for all metrics in this phase
    fn metrics_documentation() -> Vec<MetricDoc>;
}

/// Documentation for a single metric
#[derive(Debug, Clone)]
pub struct MetricDoc {
    pub name: &'static str,
    pub metric_type: MetricType,
    pub help: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Histogram,
    Gauge,
}

/// Builds metric names following `commissary_{phase}_{name}[_total]`.
macro_rules! phase_metric {
    (counter, $phase:literal, $name:literal) => {
        concat!("commissary_", $phase, "_", $name, "_total")
    };
    (histogram, $phase:literal, $name:literal) => {
        concat!("commissary_", $phase, "_", $name)
    };
    (gauge, $phase:literal, $name:literal) => {
        concat!("commissary_", $phase, "_", $name)
    };
}

pub(crate) use phase_metric;

/// Register every phase's metrics with the installed recorder.
pub fn register_all_metrics() {
    ParserMetrics::register_metrics();
    PipelineMetrics::register_metrics();
}

/// All metric docs, for exporters that want descriptions.
pub fn all_metrics_documentation() -> Vec<MetricDoc> {
    let mut docs = ParserMetrics::metrics_documentation();
    docs.extend(PipelineMetrics::metrics_documentation());
    docs
}
