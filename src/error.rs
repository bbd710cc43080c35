use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{ItemId, Period};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParseFailureReason {
    StructuralMismatch,
    Unreadable,
    Empty,
    TimedOut,
}

impl ParseFailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParseFailureReason::StructuralMismatch => "structural-mismatch",
            ParseFailureReason::Unreadable => "unreadable",
            ParseFailureReason::Empty => "empty",
            ParseFailureReason::TimedOut => "timed-out",
        }
    }
}

impl std::fmt::Display for ParseFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecoverable input for one document. Fatal for that document only.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("Parse failed ({reason}) for period {period}: {detail}")]
pub struct ParseError {
    pub reason: ParseFailureReason,
    pub period: Period,
    pub detail: String,
}

impl ParseError {
    pub fn new(reason: ParseFailureReason, period: Period, detail: impl Into<String>) -> Self {
        Self { reason, period, detail: detail.into() }
    }
}

/// A second cell for an existing (identity, period) without a supersede reference.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Duplicate panel cell for {identity_id} in period {period}")]
pub struct DuplicateCellError {
    pub identity_id: ItemId,
    pub period: Period,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SupersedeError {
    #[error("No cell exists for {identity_id} in period {period}")]
    MissingCell { identity_id: ItemId, period: Period },

    #[error("Stale supersede reference for {identity_id} in {period}: expected version {current}, got {referenced}")]
    StaleReference {
        identity_id: ItemId,
        period: Period,
        current: u32,
        referenced: u32,
    },

    #[error("Supersede reason must not be empty")]
    MissingReason,
}

/// A persisted panel table that does not describe a valid version history.
#[derive(Error, Debug)]
pub enum PanelTableError {
    #[error("Version gap for {identity_id} in period {period}: expected v{expected}, found v{found}")]
    VersionGap {
        identity_id: ItemId,
        period: Period,
        expected: u32,
        found: u32,
    },

    #[error("Panel table JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MergeError {
    #[error("Unknown identity: {0}")]
    UnknownIdentity(ItemId),

    #[error("Cannot merge {0} into itself")]
    SelfMerge(ItemId),

    #[error("Identity {0} is already merged into {1}")]
    AlreadyMerged(ItemId, ItemId),
}

/// Too many periods failed to support a defensible index.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Insufficient coverage: {failed} of {total} periods failed (limit {max_fraction})")]
pub struct InsufficientCoverageError {
    pub failed: usize,
    pub total: usize,
    pub max_fraction: f64,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Errors that abort a whole pipeline run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    InsufficientCoverage(#[from] InsufficientCoverageError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("No documents supplied")]
    NoDocuments,

    #[error("Parse worker failed: {0}")]
    Worker(String),
}
