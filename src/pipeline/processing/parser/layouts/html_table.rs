use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};

use super::ParseContext;
use crate::domain::{RawObservation, SourceLocation};

static TABLE: Lazy<Selector> = Lazy::new(|| Selector::parse("table").expect("static table selector"));
static ROW: Lazy<Selector> = Lazy::new(|| Selector::parse("tr").expect("static row selector"));
static CELL: Lazy<Selector> = Lazy::new(|| Selector::parse("th, td").expect("static cell selector"));

/// Column positions found in a table's header row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Columns {
    item: usize,
    unit: Option<usize>,
    price: usize,
}

impl Columns {
    fn from_header(cells: &[String]) -> Option<Columns> {
        let find = |keys: &[&str]| {
            cells.iter().position(|cell| {
                let cell = cell.to_lowercase();
                keys.iter().any(|k| cell.contains(k))
            })
        };
        let item = find(&["item", "description", "product"])?;
        let price = find(&["price", "cost"])?;
        if item == price {
            return None;
        }
        let unit = find(&["size", "unit", "qty"]).filter(|u| *u != item && *u != price);
        Some(Columns { item, unit, price })
    }
}

// A section heading is a lone cell spanning the table width.
fn section_heading(row: ElementRef) -> Option<String> {
    let mut cells = row.select(&CELL);
    let cell = cells.next()?;
    if cells.next().is_some() || cell.value().attr("colspan").is_none() {
        return None;
    }
    let text = cell.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ");
    (!text.is_empty()).then_some(text)
}

fn cell_texts(row: ElementRef) -> Vec<String> {
    row.select(&CELL)
        .map(|cell| cell.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" "))
        .collect()
}

pub(super) fn matches(text: &str) -> bool {
    if !text.to_lowercase().contains("<table") {
        return false;
    }
    let document = Html::parse_document(text);
    let matched = document
        .select(&TABLE)
        .any(|table| table.select(&ROW).any(|row| Columns::from_header(&cell_texts(row)).is_some()));
    matched
}

/// Rows read from every table, plus what had to be passed over.
#[derive(Debug, Default)]
struct TableScan {
    observations: Vec<RawObservation>,
    /// Non-empty rows above a table's header row.
    rows_before_header: usize,
    /// Tables with no recognizable header, and the rows they held.
    headerless_tables: usize,
    headerless_rows: usize,
}

fn scan(text: &str, ctx: &ParseContext) -> TableScan {
    let document = Html::parse_document(text);
    let mut scan = TableScan::default();
    let mut row_number = 0usize;

    for table in document.select(&TABLE) {
        let mut columns: Option<Columns> = None;
        let mut section: Option<String> = None;
        let mut pending = 0usize;

        for row in table.select(&ROW) {
            row_number += 1;
            let cells = cell_texts(row);
            if cells.iter().all(|c| c.is_empty()) {
                continue;
            }
            let Some(cols) = columns else {
                columns = Columns::from_header(&cells);
                if columns.is_some() {
                    scan.rows_before_header += pending;
                } else {
                    pending += 1;
                }
                continue;
            };

            if let Some(heading) = section_heading(row) {
                debug!("HtmlPriceTable: section '{}' at row {}", heading, row_number);
                section = Some(heading);
                continue;
            }

            let location = SourceLocation { line: row_number, section: section.clone() };
            let (Some(label), Some(price)) = (cells.get(cols.item), cells.get(cols.price)) else {
                scan.observations.push(ctx.unsplittable(&cells.join(" "), "row is missing item or price cell", location));
                continue;
            };
            let unit = cols.unit.and_then(|u| cells.get(u)).map(String::as_str);
            scan.observations.push(ctx.observation(label, unit, price, location));
        }

        if columns.is_none() {
            scan.headerless_tables += 1;
            scan.headerless_rows += pending;
        }
    }
    scan
}

pub(super) fn extract(text: &str, ctx: &ParseContext) -> Vec<RawObservation> {
    let scan = scan(text, ctx);
    if scan.rows_before_header > 0 {
        debug!(
            "HtmlPriceTable: {} skipped {} rows above table headers",
            ctx.document_id, scan.rows_before_header
        );
    }
    if scan.headerless_tables > 0 {
        warn!(
            "HtmlPriceTable: {} skipped {} tables without an item/price header ({} rows)",
            ctx.document_id, scan.headerless_tables, scan.headerless_rows
        );
    }
    scan.observations
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    const PAGE: &str = r#"
<html><body>
<h1>Commissary Price List</h1>
<table>
  <tr><th>Item</th><th>Size</th><th>Price</th></tr>
  <tr><td colspan="3">Hygiene</td></tr>
  <tr><td>Soap Bar</td><td>3 oz</td><td>$0.89</td></tr>
  <tr><td>Toothpaste</td><td></td><td>1.10</td></tr>
  <tr><td>Deodorant</td><td>2 furlongs</td><td>1.50</td></tr>
  <tr><td>Comb</td></tr>
</table>
</body></html>
"#;

    fn ctx() -> ParseContext {
        ParseContext { document_id: "doc".to_string(), period: "2020".parse().unwrap() }
    }

    #[test]
    fn test_matches_needs_item_and_price_header() {
        assert!(matches(PAGE));
        assert!(!matches("<table><tr><td>a</td><td>b</td></tr></table>"));
        assert!(!matches("COMMISSARY PRICE LIST\nSOAP 0.79"));
    }

    #[test]
    fn test_extract_rows() {
        let rows = extract(PAGE, &ctx());
        assert_eq!(rows.len(), 4);

        assert_eq!(rows[0].raw_label, "Soap Bar");
        assert_eq!(rows[0].raw_unit.as_deref(), Some("3 oz"));
        assert_eq!(rows[0].raw_price, Some(Decimal::from_str("0.89").unwrap()));
        assert_eq!(rows[0].location.section.as_deref(), Some("Hygiene"));

        assert_eq!(rows[1].raw_unit, None);
        assert!(!rows[1].requires_review());

        assert!(rows[2].requires_review());
        assert!(rows[3].requires_review());
    }

    #[test]
    fn test_rows_outside_headed_tables_are_counted() {
        let page = r#"
<table>
  <tr><td>Effective March 2020</td></tr>
  <tr><td>All sales final</td><td></td></tr>
  <tr><th>Item</th><th>Price</th></tr>
  <tr><td>Comb</td><td>0.25</td></tr>
</table>
<table>
  <tr><td>Stamps</td><td>0.55</td></tr>
  <tr><td>Envelope</td><td>0.10</td></tr>
</table>
"#;
        let scan = scan(page, &ctx());
        assert_eq!(scan.observations.len(), 1);
        assert_eq!(scan.observations[0].raw_label, "Comb");
        assert_eq!(scan.rows_before_header, 2);
        assert_eq!(scan.headerless_tables, 1);
        assert_eq!(scan.headerless_rows, 2);
    }
}
