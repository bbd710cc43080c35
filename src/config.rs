use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::constants::*;
use crate::error::ConfigError;

/// Settings for one pipeline run. Every field has a default so a partial
/// TOML file (or none at all) is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Max documents parsed concurrently.
    pub parse_pool_size: usize,
    pub parse_timeout_secs: u64,
    /// Fraction of periods allowed to fail before the run is aborted.
    pub max_failed_period_fraction: f64,
    pub match_acceptance_threshold: f64,
    /// Candidates scoring below this are not even logged as near misses.
    pub match_consideration_floor: f64,
    pub index: IndexConfig,
    pub rules_path: Option<PathBuf>,
    pub aliases_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// A link with fewer contributing items is low-confidence.
    pub min_basket_size: usize,
    /// A link whose basket is below this share of tracked items is low-confidence.
    pub low_coverage_fraction: f64,
    pub min_periods_observed: usize,
    /// A single-link change above this percentage counts as a significant increase.
    pub significant_increase_pct: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            parse_pool_size: DEFAULT_PARSE_POOL_SIZE,
            parse_timeout_secs: DEFAULT_PARSE_TIMEOUT_SECS,
            max_failed_period_fraction: DEFAULT_MAX_FAILED_PERIOD_FRACTION,
            match_acceptance_threshold: DEFAULT_MATCH_ACCEPTANCE_THRESHOLD,
            match_consideration_floor: DEFAULT_MATCH_CONSIDERATION_FLOOR,
            index: IndexConfig::default(),
            rules_path: None,
            aliases_path: None,
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            min_basket_size: DEFAULT_MIN_BASKET_SIZE,
            low_coverage_fraction: DEFAULT_LOW_COVERAGE_FRACTION,
            min_periods_observed: 1,
            significant_increase_pct: DEFAULT_SIGNIFICANT_INCREASE_PCT,
        }
    }
}

impl PipelineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.parse_pool_size == 0 {
            return Err(ConfigError::Invalid("parse_pool_size must be at least 1".to_string()));
        }
        if self.parse_timeout_secs == 0 {
            return Err(ConfigError::Invalid("parse_timeout_secs must be at least 1".to_string()));
        }
        for (name, value) in [
            ("max_failed_period_fraction", self.max_failed_period_fraction),
            ("match_acceptance_threshold", self.match_acceptance_threshold),
            ("match_consideration_floor", self.match_consideration_floor),
            ("index.low_coverage_fraction", self.index.low_coverage_fraction),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!("{} must be within [0, 1], got {}", name, value)));
            }
        }
        if self.match_consideration_floor > self.match_acceptance_threshold {
            return Err(ConfigError::Invalid(
                "match_consideration_floor must not exceed match_acceptance_threshold".to_string(),
            ));
        }
        Ok(())
    }
}
