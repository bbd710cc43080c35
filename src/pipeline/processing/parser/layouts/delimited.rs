use super::ParseContext;
use crate::domain::{RawObservation, SourceLocation};

const DELIMITERS: [char; 3] = ['\t', '|', ','];

#[derive(Debug, Clone, Copy)]
struct Header {
    delimiter: char,
    item: usize,
    unit: Option<usize>,
    price: usize,
    section: Option<usize>,
}

/// Split one record, honouring double quotes around fields that contain the
/// delimiter. A doubled quote inside a quoted field is a literal quote.
fn split_record(line: &str, delimiter: char) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            c if c == delimiter && !in_quotes => {
                fields.push(current.trim().to_string());
                current.clear();
            }
            c => current.push(c),
        }
    }
    fields.push(current.trim().to_string());
    fields
}

fn parse_header(line: &str) -> Option<Header> {
    for delimiter in DELIMITERS {
        if !line.contains(delimiter) {
            continue;
        }
        let columns: Vec<String> = split_record(line, delimiter).into_iter().map(|c| c.to_lowercase()).collect();
        let find = |keys: &[&str]| columns.iter().position(|c| keys.iter().any(|k| c == k || c.contains(k)));

        let (Some(item), Some(price)) = (find(&["item", "description", "product"]), find(&["price", "cost"])) else {
            continue;
        };
        if item == price {
            continue;
        }
        let unit = find(&["size", "unit", "qty"]).filter(|u| *u != item && *u != price);
        let section = find(&["category", "section", "department"]).filter(|s| *s != item && *s != price);
        return Some(Header { delimiter, item, unit, price, section });
    }
    None
}

fn first_line(text: &str) -> Option<(usize, &str)> {
    text.lines().enumerate().map(|(i, l)| (i, l.trim())).find(|(_, l)| !l.is_empty())
}

pub(super) fn matches(text: &str) -> bool {
    match first_line(text) {
        Some((_, line)) => !line.starts_with('<') && parse_header(line).is_some(),
        None => false,
    }
}

pub(super) fn extract(text: &str, ctx: &ParseContext) -> Vec<RawObservation> {
    let Some((header_index, header_line)) = first_line(text) else {
        return Vec::new();
    };
    let Some(header) = parse_header(header_line) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for (index, line) in text.lines().enumerate().skip(header_index + 1) {
        if line.trim().is_empty() {
            continue;
        }
        let fields = split_record(line, header.delimiter);
        let section = header.section.and_then(|s| fields.get(s)).filter(|s| !s.is_empty()).cloned();
        let location = SourceLocation { line: index + 1, section };

        let (Some(label), Some(price)) = (fields.get(header.item), fields.get(header.price)) else {
            out.push(ctx.unsplittable(line, "record has fewer fields than the header", location));
            continue;
        };
        let unit = header.unit.and_then(|u| fields.get(u)).map(String::as_str);
        out.push(ctx.observation(label, unit, price, location));
    }
    out
}
