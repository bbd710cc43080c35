//! Strict token grammars for prices and unit suffixes.
//!
//! Anything these functions reject is reported by the layouts as a review
//! row; nothing is guessed.

use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::domain::PriceRange;

static PRICE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\$?(\d{1,4}\.\d{2})$").expect("static price pattern"));

static PRICE_RANGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\$?(\d{1,4}\.\d{2})\s*-\s*\$?(\d{1,4}\.\d{2})$").expect("static price range pattern")
});

// A price or range at the very end of a text line, preceded by whitespace.
static TRAILING_PRICE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\s(\$?\d{1,4}\.\d{2}(?:\s*-\s*\$?\d{1,4}\.\d{2})?)$").expect("static trailing price pattern")
});

// Anything that looks like it wants to be a price but is not in the grammar.
static PRICE_LIKE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\$\s*\d|\d+\.\d+\s*$|\d+\.\d{1}$|\d+-\s*$)").expect("static price-like pattern"));

// Stand-ins printed where a price would be.
static PRICE_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:^|\s)(?:n/?a|free|tbd|\$|-{1,2})$").expect("static price placeholder pattern"));

/// Unit suffixes the parser accepts. The normalizer's rule table decides
/// what each one means; the parser only checks membership.
pub const UNIT_SUFFIXES: &[&str] = &[
    "oz", "fl oz", "lb", "lbs", "g", "kg", "ct", "count", "pk", "pack", "pkg", "tab", "tabs", "tablet",
    "tablets", "sheet", "sheets", "sht", "bag", "bags", "piece", "pieces", "pc", "ea", "each", "roll",
    "rolls", "pr", "pair",
];

static UNIT: Lazy<Regex> = Lazy::new(|| {
    let alternatives = UNIT_SUFFIXES
        .iter()
        .map(|s| regex::escape(s).replace(' ', r"\s*"))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"(?i)^(\d+(?:\.\d+)?)?\s*({})\.?$", alternatives)).expect("static unit pattern")
});

static DIMENSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)^(\d+(?:\.\d+)?)\s*"?\s*x\s*(\d+(?:\.\d+)?)"?$"#).expect("static dimension pattern"));

// Sizes embedded at the end of a label, in priority order.
static EMBEDDED_SIZES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\((\d+(?:\.\d+)?\s*(?:fl\s*oz|oz|lbs?|kg|g|pk|pack|pkg|ct|count|pieces?|pc|tabs?|tablets?|sheets?|sht|bags?|rolls?|pr|pair))\)$",
        r"(?i)[-\s](\d+(?:\.\d+)?\s*(?:fl\s*oz|oz|lbs?|kg|g))$",
        r"(?i)[-\s](\d+\s*(?:pk|pack|pkg|ct|count|pieces?|pc|tabs?|tablets?|sheets?|sht|bags?|rolls?|pr|pair))$",
        r#"(?i)[-\s](\d+(?:\.\d+)?\s*"?\s*x\s*\d+(?:\.\d+)?"?)$"#,
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static size pattern"))
    .collect()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceToken {
    pub price: Decimal,
    pub range: Option<PriceRange>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitToken {
    pub quantity: Option<Decimal>,
    /// Lowercased suffix with internal whitespace removed, or `x` for dimensions.
    pub suffix: String,
}

fn decimal(s: &str) -> Option<Decimal> {
    Decimal::from_str(s).ok()
}

/// Parse a price cell: `0.79`, `$12.50`, or a range `1.25-1.45`.
/// A range resolves to its midpoint.
pub fn parse_price(token: &str) -> Option<PriceToken> {
    let token = token.trim();
    if let Some(caps) = PRICE.captures(token) {
        let price = decimal(&caps[1])?;
        return Some(PriceToken { price, range: None });
    }
    if let Some(caps) = PRICE_RANGE.captures(token) {
        let min = decimal(&caps[1])?;
        let max = decimal(&caps[2])?;
        if max < min {
            return None;
        }
        let price = (min + max) / Decimal::TWO;
        return Some(PriceToken { price, range: Some(PriceRange { min, max }) });
    }
    None
}

/// Split a text line into (rest, trailing price text) when it ends in a
/// price the grammar accepts.
pub fn split_trailing_price(line: &str) -> Option<(&str, &str)> {
    let line = line.trim_end();
    let caps = TRAILING_PRICE.captures(line)?;
    let whole = caps.get(0)?;
    let price_text = caps.get(1)?.as_str();
    parse_price(price_text)?;
    Some((line[..whole.start()].trim_end(), price_text))
}

/// True when the text ends in something price-shaped that the grammar rejects.
pub fn looks_like_price(text: &str) -> bool {
    PRICE_LIKE.is_match(text.trim())
}

/// True when the text ends in a placeholder (`N/A`, `FREE`, a bare `$`)
/// where a price belongs.
pub fn has_price_placeholder(text: &str) -> bool {
    PRICE_PLACEHOLDER.is_match(text.trim())
}

pub fn parse_unit(token: &str) -> Option<UnitToken> {
    let token = token.trim();
    if token.is_empty() {
        return None;
    }
    if let Some(caps) = UNIT.captures(token) {
        let quantity = match caps.get(1) {
            Some(m) => Some(decimal(m.as_str())?),
            None => None,
        };
        let suffix: String = caps[2].to_lowercase().split_whitespace().collect();
        return Some(UnitToken { quantity, suffix });
    }
    if DIMENSION.is_match(token) {
        return Some(UnitToken { quantity: None, suffix: "x".to_string() });
    }
    None
}

/// Pull a size such as `-3 oz`, `(10 pk)` or `9 x 12` off the end of a label.
pub fn split_embedded_size(label: &str) -> Option<(String, String)> {
    let label = label.trim();
    for pattern in EMBEDDED_SIZES.iter() {
        if let Some(caps) = pattern.captures(label) {
            let whole = caps.get(0)?;
            let size = caps[1].trim().to_string();
            let rest = label[..whole.start()].trim().trim_end_matches(['-', ',']).trim().to_string();
            if rest.is_empty() {
                return None;
            }
            return Some((rest, size));
        }
    }
    None
}
