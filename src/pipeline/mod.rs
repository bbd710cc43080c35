// Commissary pipeline: document processing stages and the run orchestrator

pub mod orchestrator;
pub mod processing;
pub mod report;

// Re-export key types from each stage
pub use orchestrator::{IngestionRecord, Pipeline, PipelineState, RunOutput, SourceDocument};
pub use processing::parser;
pub use report::RunReport;
