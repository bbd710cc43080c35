/// Layout identifiers used in logs, metrics labels and the run report.
/// Each one names exactly one `DocumentLayout` variant.
pub const HTML_PRICE_TABLE_V1: &str = "html_price_table_v1";
pub const CATEGORY_BLOCK_TEXT_V1: &str = "category_block_text_v1";
pub const DELIMITED_PRICE_LIST_V1: &str = "delimited_price_list_v1";

/// Get all supported layout identifiers
pub fn get_supported_layouts() -> Vec<&'static str> {
    vec![HTML_PRICE_TABLE_V1, CATEGORY_BLOCK_TEXT_V1, DELIMITED_PRICE_LIST_V1]
}

// Built-in rule table version; bump whenever any built-in table changes.
pub const BUILTIN_RULES_VERSION: &str = "rules-v1";

// Index base value at the first period.
pub const INDEX_BASE: f64 = 100.0;

// Pipeline defaults
pub const DEFAULT_PARSE_POOL_SIZE: usize = 4;
pub const DEFAULT_PARSE_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_FAILED_PERIOD_FRACTION: f64 = 0.25;
pub const DEFAULT_MATCH_ACCEPTANCE_THRESHOLD: f64 = 0.75;
pub const DEFAULT_MATCH_CONSIDERATION_FLOOR: f64 = 0.30;
pub const DEFAULT_MIN_BASKET_SIZE: usize = 5;
pub const DEFAULT_LOW_COVERAGE_FRACTION: f64 = 0.10;
pub const DEFAULT_SIGNIFICANT_INCREASE_PCT: f64 = 10.0;

// Per-item anomaly thresholds, in percent.
pub const CORRECTION_SPIKE_PCT: f64 = 50.0;
pub const CORRECTION_DROP_PCT: f64 = -5.0;
pub const EXTREME_CUMULATIVE_PCT: f64 = 500.0;
