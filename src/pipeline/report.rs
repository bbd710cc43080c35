//! Structured summary of everything a run did not silently accept.

use serde::{Deserialize, Serialize};

use crate::domain::{ItemId, Period};
use crate::error::ParseError;
use crate::gateway::audit_log::NearMiss;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GapReason {
    Parse(ParseError),
    DuplicateCell { identity_id: ItemId, detail: String },
}

/// A period skipped by this run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodGap {
    pub period: Period,
    pub reason: GapReason,
}

/// A parsed line with a token outside the price/unit grammar. Reported,
/// never priced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRow {
    pub period: Period,
    pub source_document_id: String,
    pub line: usize,
    pub section: Option<String>,
    pub raw_label: String,
    pub reason: String,
}

/// A label whose best candidates fell below the acceptance threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Escalation {
    pub period: Period,
    pub label: String,
    pub resolved_to: ItemId,
    pub resolution: String,
    pub candidates: Vec<NearMiss>,
}

/// A document whose (document, period, rules) key was already committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedDocument {
    pub period: Period,
    pub document_id: String,
}

/// A label the normalizer could only resolve with low confidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmbiguousLabel {
    pub period: Period,
    pub raw_label: String,
    pub raw_unit: Option<String>,
    pub identity_id: ItemId,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub rules_version: String,
    pub documents_received: usize,
    pub skipped_documents: Vec<SkippedDocument>,
    pub periods_seen: usize,
    pub periods_ingested: Vec<Period>,
    pub gaps: Vec<PeriodGap>,
    pub review_rows: Vec<ReviewRow>,
    pub ambiguous_labels: Vec<AmbiguousLabel>,
    pub escalations: Vec<Escalation>,
    pub unreviewed_identities: Vec<ItemId>,
    pub identities_created: usize,
    pub cells_inserted: usize,
    pub low_confidence_periods: Vec<Period>,
}

impl RunReport {
    pub fn new(rules_version: &str) -> Self {
        Self { rules_version: rules_version.to_string(), ..Self::default() }
    }

    pub fn gap_periods(&self) -> Vec<Period> {
        self.gaps.iter().map(|g| g.period).collect()
    }

    /// Fraction of periods seen that ended up as gaps.
    pub fn failed_fraction(&self) -> f64 {
        if self.periods_seen == 0 {
            return 0.0;
        }
        self.gaps.len() as f64 / self.periods_seen as f64
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ParseFailureReason;

    #[test]
    fn test_failed_fraction_and_json() {
        let period: Period = "2019".parse().unwrap();
        let mut report = RunReport::new("rules-v1");
        report.periods_seen = 4;
        report.gaps.push(PeriodGap {
            period,
            reason: GapReason::Parse(ParseError::new(ParseFailureReason::StructuralMismatch, period, "no layout")),
        });
        assert_eq!(report.failed_fraction(), 0.25);
        assert_eq!(report.gap_periods(), vec![period]);

        let json = report.to_json().unwrap();
        assert!(json.contains("structural-mismatch"));
        let back: RunReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, report);
    }
}
