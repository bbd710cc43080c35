// Parses the text rendition of the printed price list:
//
//   UNIT COMMISSARY PRICE LIST - 2019
//   HYGIENE
//   E SOAP BAR-3 oz 0.79
//   DEODORANT 2.6 OZ 1.25-1.45
//
// Banner lines near the top carry the header keywords, ALL-CAPS lines without
// digits or a price stand-in open a section, every other non-blank line is an
// item ending in a price.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use super::ParseContext;
use crate::domain::{RawObservation, SourceLocation};
use crate::pipeline::processing::parser::grammar::{has_price_placeholder, looks_like_price, split_trailing_price};

const BANNER_KEYWORDS: &[&str] = &["PRICE LIST", "TDCJ"];

// How far into the document the banner may appear.
const BANNER_WINDOW: usize = 5;

static FACILITY_CODES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:[EGHK]\s+)+").expect("static facility code pattern"));

fn is_banner(line: &str) -> bool {
    let upper = line.to_uppercase();
    BANNER_KEYWORDS.iter().any(|k| upper.contains(k))
}

fn is_section_header(line: &str) -> bool {
    !has_price_placeholder(line)
        && line.chars().any(|c| c.is_alphabetic())
        && !line.chars().any(|c| c.is_ascii_digit())
        && !line.chars().any(|c| c.is_lowercase())
}

pub(super) fn matches(text: &str) -> bool {
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
    let Some(first) = lines.clone().next() else {
        return false;
    };
    if first.starts_with('<') {
        return false;
    }
    lines.by_ref().take(BANNER_WINDOW).any(|line| {
        let upper = line.to_uppercase();
        upper.contains("COMMISSARY") && upper.contains("PRICE LIST")
    })
}

pub(super) fn extract(text: &str, ctx: &ParseContext) -> Vec<RawObservation> {
    let mut out = Vec::new();
    let mut section: Option<String> = None;
    let mut seen = 0;

    for (index, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        seen += 1;
        if seen <= BANNER_WINDOW && is_banner(line) && split_trailing_price(line).is_none() {
            debug!("CategoryBlockText: banner '{}' at line {}", line, index + 1);
            continue;
        }
        let location = SourceLocation { line: index + 1, section: section.clone() };

        let stripped = FACILITY_CODES.replace(line, "");
        let line = stripped.trim();

        if let Some((label, price_text)) = split_trailing_price(line) {
            out.push(ctx.observation(label, None, price_text, location));
        } else if looks_like_price(line) || has_price_placeholder(line) {
            warn!("CategoryBlockText: price outside grammar at line {}: '{}'", index + 1, line);
            out.push(ctx.unsplittable(line, "price token outside price grammar", location));
        } else if is_section_header(line) {
            debug!("CategoryBlockText: section '{}' at line {}", line, index + 1);
            section = Some(line.to_string());
        } else {
            out.push(ctx.unsplittable(line, "line has no price", location));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    const SAMPLE: &str = "\
UNIT COMMISSARY PRICE LIST - 2019

HYGIENE
E SOAP BAR 3OZ 0.79
E K DEODORANT-2.6 oz 1.25-1.45
Toothbrush 0.5

INSTANT FOODS
RAMEN NOODLES CHICKEN 0.30
";

    fn ctx() -> ParseContext {
        ParseContext { document_id: "doc".to_string(), period: "2019".parse().unwrap() }
    }

    #[test]
    fn test_matches_requires_banner() {
        assert!(matches(SAMPLE));
        assert!(!matches("HYGIENE\nSOAP BAR 0.79\n"));
        assert!(!matches("<html><body>COMMISSARY PRICE LIST</body></html>"));
    }

    #[test]
    fn test_extract_items_sections_and_review_rows() {
        let rows = extract(SAMPLE, &ctx());
        assert_eq!(rows.len(), 4);

        let soap = &rows[0];
        assert_eq!(soap.raw_label, "SOAP BAR");
        assert_eq!(soap.raw_unit.as_deref(), Some("3OZ"));
        assert_eq!(soap.raw_price, Some(Decimal::from_str("0.79").unwrap()));
        assert_eq!(soap.location.section.as_deref(), Some("HYGIENE"));
        assert_eq!(soap.location.line, 4);

        let deodorant = &rows[1];
        assert_eq!(deodorant.raw_label, "DEODORANT");
        assert_eq!(deodorant.raw_unit.as_deref(), Some("2.6 oz"));
        assert_eq!(deodorant.raw_price, Some(Decimal::from_str("1.35").unwrap()));
        assert!(deodorant.price_range.is_some());

        let toothbrush = &rows[2];
        assert!(toothbrush.requires_review());
        assert_eq!(toothbrush.raw_price, None);

        assert_eq!(rows[3].location.section.as_deref(), Some("INSTANT FOODS"));
    }

    #[test]
    fn test_placeholder_prices_and_late_banner_keywords_are_kept() {
        let text = "COMMISSARY PRICE LIST 2019\nHYGIENE\nTOOTHBRUSH N/A\nSOAP BAR 3OZ 0.79\nTDCJ ID CARD REPLACEMENT 5.00\n";
        let rows = extract(text, &ctx());
        assert_eq!(rows.len(), 3);

        let toothbrush = &rows[0];
        assert_eq!(toothbrush.raw_label, "TOOTHBRUSH N/A");
        assert_eq!(toothbrush.review.as_deref(), Some("price token outside price grammar"));
        assert_eq!(toothbrush.location.section.as_deref(), Some("HYGIENE"));

        assert_eq!(rows[1].raw_label, "SOAP BAR");
        assert_eq!(rows[1].location.section.as_deref(), Some("HYGIENE"));

        let card = &rows[2];
        assert_eq!(card.raw_label, "TDCJ ID CARD REPLACEMENT");
        assert_eq!(card.raw_price, Some(Decimal::from_str("5.00").unwrap()));
    }
}
