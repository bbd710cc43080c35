//! Known catalog layouts.
//!
//! Each year's capture must match exactly one fingerprint. A new layout is a
//! new variant here plus its module; there is no fallback.

mod category_block;
mod delimited;
mod html_table;

use serde::{Deserialize, Serialize};

use super::grammar::{parse_price, parse_unit, split_embedded_size};
use crate::constants::{CATEGORY_BLOCK_TEXT_V1, DELIMITED_PRICE_LIST_V1, HTML_PRICE_TABLE_V1};
use crate::domain::{Period, RawObservation, SourceLocation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentLayout {
    /// Archived web page with an item/size/price `<table>`.
    HtmlPriceTable,
    /// Text extraction of the printed price list: banner, ALL-CAPS section
    /// headers, one item per line ending in a price.
    CategoryBlockText,
    /// Delimited export with a header row naming item and price columns.
    DelimitedPriceList,
}

impl DocumentLayout {
    pub const ALL: [DocumentLayout; 3] = [
        DocumentLayout::HtmlPriceTable,
        DocumentLayout::CategoryBlockText,
        DocumentLayout::DelimitedPriceList,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            DocumentLayout::HtmlPriceTable => HTML_PRICE_TABLE_V1,
            DocumentLayout::CategoryBlockText => CATEGORY_BLOCK_TEXT_V1,
            DocumentLayout::DelimitedPriceList => DELIMITED_PRICE_LIST_V1,
        }
    }

    pub(crate) fn matches(&self, text: &str) -> bool {
        match self {
            DocumentLayout::HtmlPriceTable => html_table::matches(text),
            DocumentLayout::CategoryBlockText => category_block::matches(text),
            DocumentLayout::DelimitedPriceList => delimited::matches(text),
        }
    }

    /// The single layout whose fingerprint matches, or `None` when zero or
    /// several do.
    pub fn fingerprint(text: &str) -> Option<DocumentLayout> {
        let mut matched = Self::ALL.iter().filter(|layout| layout.matches(text));
        let first = matched.next()?;
        if matched.next().is_some() {
            return None;
        }
        Some(*first)
    }

    pub(crate) fn extract(&self, text: &str, ctx: &ParseContext) -> Vec<RawObservation> {
        match self {
            DocumentLayout::HtmlPriceTable => html_table::extract(text, ctx),
            DocumentLayout::CategoryBlockText => category_block::extract(text, ctx),
            DocumentLayout::DelimitedPriceList => delimited::extract(text, ctx),
        }
    }
}

/// Per-document values stamped on every observation.
#[derive(Debug, Clone)]
pub(crate) struct ParseContext {
    pub document_id: String,
    pub period: Period,
}

impl ParseContext {
    /// Build an observation from label/unit/price cells, flagging any token
    /// outside the grammar instead of dropping the row.
    pub fn observation(
        &self,
        label: &str,
        unit_cell: Option<&str>,
        price_cell: &str,
        location: SourceLocation,
    ) -> RawObservation {
        let mut problems = Vec::new();
        let mut label = label.split_whitespace().collect::<Vec<_>>().join(" ");
        let mut raw_unit = unit_cell.map(str::trim).filter(|u| !u.is_empty()).map(str::to_string);

        if raw_unit.is_none() {
            if let Some((rest, size)) = split_embedded_size(&label) {
                label = rest;
                raw_unit = Some(size);
            }
        }
        if label.is_empty() {
            problems.push("empty item label".to_string());
        }
        if let Some(unit) = &raw_unit {
            if parse_unit(unit).is_none() {
                problems.push(format!("unit token '{}' outside unit grammar", unit));
            }
        }
        let price = parse_price(price_cell);
        if price.is_none() {
            problems.push(format!("price token '{}' outside price grammar", price_cell.trim()));
        }

        RawObservation {
            source_document_id: self.document_id.clone(),
            period: self.period,
            raw_label: label,
            raw_unit,
            raw_price: price.map(|p| p.price),
            price_range: price.and_then(|p| p.range),
            location,
            review: if problems.is_empty() { None } else { Some(problems.join("; ")) },
        }
    }

    /// A row the layout recognized as an item but could not split into cells.
    pub fn unsplittable(&self, text: &str, reason: &str, location: SourceLocation) -> RawObservation {
        RawObservation {
            source_document_id: self.document_id.clone(),
            period: self.period,
            raw_label: text.split_whitespace().collect::<Vec<_>>().join(" "),
            raw_unit: None,
            raw_price: None,
            price_range: None,
            location,
            review: Some(reason.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ParseContext {
        ParseContext { document_id: "doc".to_string(), period: "2019".parse().unwrap() }
    }

    #[test]
    fn test_every_layout_has_a_supported_id() {
        let supported = crate::constants::get_supported_layouts();
        assert_eq!(supported.len(), DocumentLayout::ALL.len());
        for layout in DocumentLayout::ALL {
            assert!(supported.contains(&layout.id()));
        }
    }

    fn loc() -> SourceLocation {
        SourceLocation { line: 1, section: None }
    }

    #[test]
    fn test_observation_splits_embedded_size() {
        let obs = ctx().observation("SOAP  BAR 3OZ", None, "0.79", loc());
        assert_eq!(obs.raw_label, "SOAP BAR");
        assert_eq!(obs.raw_unit.as_deref(), Some("3OZ"));
        assert!(!obs.requires_review());
    }

    #[test]
    fn test_observation_flags_bad_tokens() {
        let obs = ctx().observation("Deodorant", Some("2 furlongs"), "1.5", loc());
        let review = obs.review.unwrap();
        assert!(review.contains("unit token"));
        assert!(review.contains("price token"));
        assert_eq!(obs.raw_price, None);
    }

    #[test]
    fn test_fingerprint_rejects_unknown_text() {
        assert_eq!(DocumentLayout::fingerprint("hello world\nnothing to see"), None);
    }
}
