pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod storage;

pub mod gateway;
pub mod idempotency;
pub mod metrics;
pub mod pipeline;

// Domain data shapes shared across stages
pub mod domain;
