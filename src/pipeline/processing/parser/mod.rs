pub mod grammar;
pub mod layouts;

use std::time::Instant;

use tracing::{debug, info, warn};

use crate::domain::{Period, RawObservation};
use crate::error::{ParseError, ParseFailureReason};
use crate::idempotency::compute_document_id;
use crate::metrics::parser::ParserMetrics;
use layouts::{DocumentLayout, ParseContext};

/// Turns one captured price-list document into observations for `period`.
pub trait Parser: Send + Sync {
    fn parse(&self, bytes: &[u8], period: Period) -> Result<Vec<RawObservation>, ParseError>;
}

/// A wrapper that adds metrics to any parser implementation
pub struct MetricsParser<P: Parser> {
    inner: P,
}

impl<P: Parser> MetricsParser<P> {
    pub fn new(inner: P) -> Self {
        Self { inner }
    }
}

impl<P: Parser> Parser for MetricsParser<P> {
    fn parse(&self, bytes: &[u8], period: Period) -> Result<Vec<RawObservation>, ParseError> {
        let start_time = Instant::now();

        match self.inner.parse(bytes, period) {
            Ok(observations) => {
                let review_rows = observations.iter().filter(|o| o.requires_review()).count();
                ParserMetrics::record_parse_success(
                    observations.len(),
                    review_rows,
                    start_time.elapsed().as_secs_f64(),
                );
                Ok(observations)
            }
            Err(e) => {
                ParserMetrics::record_parse_error(e.reason.as_str());
                Err(e)
            }
        }
    }
}

/// Fingerprints the document against the known layouts and extracts every
/// line item with that layout. Unknown layouts are rejected whole.
#[derive(Debug, Default, Clone, Copy)]
pub struct CatalogParser;

impl CatalogParser {
    pub fn new() -> Self {
        Self
    }
}

impl Parser for CatalogParser {
    fn parse(&self, bytes: &[u8], period: Period) -> Result<Vec<RawObservation>, ParseError> {
        debug!("CatalogParser: start period={} bytes_len={}", period, bytes.len());

        let text = std::str::from_utf8(bytes).map_err(|e| {
            ParseError::new(ParseFailureReason::Unreadable, period, format!("document is not UTF-8: {}", e))
        })?;
        if text.trim().is_empty() {
            return Err(ParseError::new(ParseFailureReason::Empty, period, "document has no content"));
        }

        let layout = DocumentLayout::fingerprint(text).ok_or_else(|| {
            let matched: Vec<&str> = DocumentLayout::ALL
                .iter()
                .filter(|l| l.matches(text))
                .map(|l| l.id())
                .collect();
            let detail = if matched.is_empty() {
                "no known layout fingerprint matched".to_string()
            } else {
                format!("several layout fingerprints matched: {}", matched.join(", "))
            };
            ParseError::new(ParseFailureReason::StructuralMismatch, period, detail)
        })?;
        ParserMetrics::record_layout_matched(layout.id());

        let ctx = ParseContext { document_id: compute_document_id(bytes), period };
        let observations = layout.extract(text, &ctx);
        if observations.is_empty() {
            return Err(ParseError::new(
                ParseFailureReason::Empty,
                period,
                format!("layout {} matched but yielded no line items", layout.id()),
            ));
        }

        let review_rows = observations.iter().filter(|o| o.requires_review()).count();
        if review_rows > 0 {
            warn!(
                "CatalogParser: period={} layout={} review_rows={} of {}",
                period,
                layout.id(),
                review_rows,
                observations.len()
            );
        }
        info!(
            "CatalogParser: period={} layout={} observations={}",
            period,
            layout.id(),
            observations.len()
        );
        Ok(observations)
    }
}
