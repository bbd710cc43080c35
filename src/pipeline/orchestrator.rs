//! Sequences parse → normalize → match → panel → index for a batch of
//! documents and owns the failure policy.
//!
//! Parsing fans out across a bounded pool with a per-document timeout.
//! Matching and panel insertion run on one task, period by period, oldest
//! first. Each period is applied to copies of the registry and panel and only
//! committed when every row inserts cleanly.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::PipelineConfig;
use crate::domain::{IndexPoint, ItemId, MatchConfidence, Period, PeriodRange, RawObservation, UnitBasis};
use crate::error::{ConfigError, InsufficientCoverageError, ParseError, ParseFailureReason, PipelineError};
use crate::gateway::audit_log::{AuditEvent, AuditLog};
use crate::idempotency::{compute_document_id, compute_ingestion_key};
use crate::metrics::PipelineMetrics;
use crate::pipeline::processing::index::{
    compare, detect_anomalies, item_inflation, recurrent_increases, CategoryIndex, ComparisonPoint, IdentityFilter,
    IndexEngine, ItemInflation, PriceAnomaly, RecurrentIncrease, ReferenceSeries,
};
use crate::pipeline::processing::matcher::{AliasTable, IdentityRegistry, ItemMatcher, MatchDecision};
use crate::pipeline::processing::normalize::{Normalizer, RuleSet};
use crate::pipeline::processing::panel::{PanelTable, PricePanel};
use crate::pipeline::processing::parser::{CatalogParser, MetricsParser, Parser};
use crate::pipeline::report::{AmbiguousLabel, Escalation, GapReason, PeriodGap, ReviewRow, RunReport, SkippedDocument};

/// Raw bytes of one captured price list and the period it covers.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub period: Period,
    pub bytes: Vec<u8>,
}

impl SourceDocument {
    pub fn new(period: Period, bytes: impl Into<Vec<u8>>) -> Self {
        Self { period, bytes: bytes.into() }
    }
}

/// State carried between runs for append-only accumulation.
#[derive(Debug, Clone, Default)]
pub struct PipelineState {
    pub panel: PricePanel,
    pub registry: IdentityRegistry,
    pub audit: AuditLog,
    /// Ingestion keys already committed to `panel`.
    pub ingested: BTreeSet<String>,
}

/// A (document, period) pair committed to the panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionRecord {
    pub ingestion_key: String,
    pub document_id: String,
    pub period: Period,
    pub rules_version: String,
}

#[derive(Debug, Clone)]
pub struct RunOutput {
    pub panel: PricePanel,
    pub registry: IdentityRegistry,
    pub audit: AuditLog,
    pub index_points: Vec<IndexPoint>,
    pub comparisons: Vec<ComparisonPoint>,
    pub category_indices: Vec<CategoryIndex>,
    pub item_inflation: Vec<ItemInflation>,
    /// Most recurrent increasers first.
    pub recurrent_increases: Vec<RecurrentIncrease>,
    pub anomalies: Vec<PriceAnomaly>,
    pub ingestions: Vec<IngestionRecord>,
    /// Every ingestion key committed so far, including earlier runs.
    pub ingested: BTreeSet<String>,
    pub report: RunReport,
}

impl RunOutput {
    pub fn panel_table(&self) -> PanelTable {
        PanelTable::from_panel(&self.panel, &self.report.rules_version)
    }

    pub fn into_state(self) -> PipelineState {
        PipelineState { panel: self.panel, registry: self.registry, audit: self.audit, ingested: self.ingested }
    }
}

struct ParsedDocument {
    index: usize,
    document_id: String,
    period: Period,
    result: Result<Vec<RawObservation>, ParseError>,
}

// One row ready for the panel.
struct PendingCell {
    identity_id: ItemId,
    price: Decimal,
    unit: UnitBasis,
    source_document_id: String,
    confidence: MatchConfidence,
}

pub struct Pipeline {
    config: PipelineConfig,
    normalizer: Normalizer,
    matcher: ItemMatcher,
    engine: IndexEngine,
    aliases: AliasTable,
    parser: Arc<dyn Parser>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, rules: Arc<RuleSet>, aliases: AliasTable) -> Self {
        crate::metrics::register_all_metrics();
        Self {
            matcher: ItemMatcher::from_config(&config),
            engine: IndexEngine::from_config(&config.index),
            normalizer: Normalizer::new(rules),
            aliases,
            parser: Arc::new(MetricsParser::new(CatalogParser::new())),
            config,
        }
    }

    /// Build from config, loading the rule set and alias table from the
    /// configured paths or falling back to the built-in rules and no aliases.
    pub fn from_config(config: PipelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let rules = match &config.rules_path {
            Some(path) => RuleSet::load(path)?,
            None => RuleSet::builtin(),
        };
        let aliases = match &config.aliases_path {
            Some(path) => AliasTable::load(path)?,
            None => AliasTable::default(),
        };
        Ok(Self::new(config, Arc::new(rules), aliases))
    }

    /// Replace the document parser.
    pub fn with_parser(mut self, parser: Arc<dyn Parser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn rules_version(&self) -> &str {
        self.normalizer.rules_version()
    }

    pub async fn run(
        &self,
        documents: Vec<SourceDocument>,
        references: &[ReferenceSeries],
    ) -> Result<RunOutput, PipelineError> {
        self.run_with_state(PipelineState::default(), documents, references, Utc::now()).await
    }

    /// Ingest `documents` on top of `state`. `recorded_at` stamps every audit
    /// entry written by this run; nothing else in the output depends on time.
    pub async fn run_with_state(
        &self,
        state: PipelineState,
        documents: Vec<SourceDocument>,
        references: &[ReferenceSeries],
        recorded_at: DateTime<Utc>,
    ) -> Result<RunOutput, PipelineError> {
        if documents.is_empty() {
            return Err(PipelineError::NoDocuments);
        }
        let mut report = RunReport::new(self.rules_version());
        report.documents_received = documents.len();
        info!(
            "Pipeline: run start documents={} rules={} existing_cells={}",
            documents.len(),
            self.rules_version(),
            state.panel.len()
        );

        let PipelineState { mut panel, mut registry, mut audit, mut ingested } = state;

        // Documents already committed under this rule version are no-ops.
        let mut batch_keys = BTreeSet::new();
        let mut fresh = Vec::with_capacity(documents.len());
        for doc in documents {
            let document_id = compute_document_id(&doc.bytes);
            let key = compute_ingestion_key(&document_id, &doc.period.to_string(), self.rules_version());
            if ingested.contains(&key) || !batch_keys.insert(key) {
                info!("Pipeline: document {} for {} already ingested; skipping", document_id, doc.period);
                report.skipped_documents.push(SkippedDocument { period: doc.period, document_id });
            } else {
                fresh.push(doc);
            }
        }

        let parsed = self.parse_all(fresh).await?;

        let mut by_period: BTreeMap<Period, Vec<ParsedDocument>> = BTreeMap::new();
        for doc in parsed {
            by_period.entry(doc.period).or_default().push(doc);
        }
        for docs in by_period.values_mut() {
            docs.sort_by(|a, b| a.document_id.cmp(&b.document_id).then(a.index.cmp(&b.index)));
        }
        report.periods_seen = by_period.len();

        let identities_before = registry.len();
        let mut ingestions = Vec::new();

        for (period, docs) in by_period {
            if let Some(err) = docs.iter().find_map(|d| d.result.as_ref().err()) {
                warn!("Pipeline: period {} skipped: {}", period, err);
                PipelineMetrics::record_period_gap();
                report.gaps.push(PeriodGap { period, reason: GapReason::Parse(err.clone()) });
                continue;
            }

            let observations: Vec<&RawObservation> =
                docs.iter().filter_map(|d| d.result.as_ref().ok()).flatten().collect();
            match self.ingest_period(period, &observations, &panel, &registry, &mut report) {
                Ok((next_panel, next_registry, events, inserted)) => {
                    panel = next_panel;
                    registry = next_registry;
                    for (identity_id, event) in events {
                        audit.record(identity_id, recorded_at, event);
                    }
                    for doc in &docs {
                        let ingestion_key =
                            compute_ingestion_key(&doc.document_id, &period.to_string(), self.rules_version());
                        ingested.insert(ingestion_key.clone());
                        ingestions.push(IngestionRecord {
                            ingestion_key,
                            document_id: doc.document_id.clone(),
                            period,
                            rules_version: self.rules_version().to_string(),
                        });
                    }
                    PipelineMetrics::record_period_ingested(inserted);
                    report.cells_inserted += inserted;
                    report.periods_ingested.push(period);
                    info!("Pipeline: period {} committed cells={}", period, inserted);
                }
                Err(gap) => {
                    PipelineMetrics::record_period_gap();
                    report.gaps.push(gap);
                }
            }
        }

        let failed_fraction = report.failed_fraction();
        if failed_fraction > self.config.max_failed_period_fraction {
            let err = InsufficientCoverageError {
                failed: report.gaps.len(),
                total: report.periods_seen,
                max_fraction: self.config.max_failed_period_fraction,
            };
            error!("Pipeline: {}", err);
            return Err(err.into());
        }

        report.identities_created = registry.len() - identities_before;
        report.unreviewed_identities = registry.iter().filter(|i| i.unreviewed).map(|i| i.identity_id).collect();

        let filter = IdentityFilter::all()
            .with_registry(&registry)
            .min_periods_observed(self.config.index.min_periods_observed);
        let headline = references
            .iter()
            .find(|r| r.series_id == self.normalizer.rules().default_reference_series);
        let index_points = self.engine.compute_with_reference(&panel, &filter, PeriodRange::all(), headline);
        let comparisons = compare(&index_points);

        let reference_map: BTreeMap<String, ReferenceSeries> =
            references.iter().map(|r| (r.series_id.clone(), r.clone())).collect();
        let category_indices = self.engine.category_indices(
            &panel,
            &registry,
            self.normalizer.rules(),
            PeriodRange::all(),
            &reference_map,
            self.config.index.min_periods_observed,
        );

        let items = item_inflation(&panel, &registry, PeriodRange::all());
        let recurrent = recurrent_increases(&items, self.config.index.significant_increase_pct);
        let anomalies = detect_anomalies(&items);
        for anomaly in &anomalies {
            warn!("Pipeline: price anomaly {:?}", anomaly);
        }

        report.low_confidence_periods = index_points.iter().filter(|p| p.low_confidence).map(|p| p.period).collect();
        PipelineMetrics::record_index_points(index_points.len(), report.low_confidence_periods.len());
        for period in &report.low_confidence_periods {
            warn!("Pipeline: index point {} is low-confidence", period);
        }
        info!(
            "Pipeline: run complete ingested={} gaps={} cells={} identities={} review_rows={} escalations={}",
            report.periods_ingested.len(),
            report.gaps.len(),
            report.cells_inserted,
            registry.len(),
            report.review_rows.len(),
            report.escalations.len()
        );

        Ok(RunOutput {
            panel,
            registry,
            audit,
            index_points,
            comparisons,
            category_indices,
            item_inflation: items,
            recurrent_increases: recurrent,
            anomalies,
            ingestions,
            ingested,
            report,
        })
    }

    async fn parse_all(&self, documents: Vec<SourceDocument>) -> Result<Vec<ParsedDocument>, PipelineError> {
        let semaphore = Arc::new(Semaphore::new(self.config.parse_pool_size));
        let timeout = Duration::from_secs(self.config.parse_timeout_secs);
        let mut set = JoinSet::new();

        for (index, doc) in documents.into_iter().enumerate() {
            let semaphore = semaphore.clone();
            let parser = self.parser.clone();
            set.spawn(async move {
                let permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| PipelineError::Worker(format!("parse pool closed: {}", e)))?;
                let SourceDocument { period, bytes } = doc;
                let document_id = compute_document_id(&bytes);

                // The permit lives as long as the parse itself, not the wait on it.
                let handle = tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    parser.parse(&bytes, period)
                });
                let result = match tokio::time::timeout(timeout, handle).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(join_error)) => Err(ParseError::new(
                        ParseFailureReason::Unreadable,
                        period,
                        format!("parser task failed: {}", join_error),
                    )),
                    Err(_) => Err(ParseError::new(
                        ParseFailureReason::TimedOut,
                        period,
                        format!("parse exceeded {}s", timeout.as_secs()),
                    )),
                };
                Ok::<_, PipelineError>(ParsedDocument { index, document_id, period, result })
            });
        }

        let mut parsed = Vec::new();
        while let Some(joined) = set.join_next().await {
            let doc = joined.map_err(|e| PipelineError::Worker(e.to_string()))??;
            parsed.push(doc);
        }
        parsed.sort_by_key(|d| d.index);
        Ok(parsed)
    }

    /// Normalize, match and insert one period's rows against copies of the
    /// panel and registry. Any duplicate cell rejects the whole period.
    #[allow(clippy::type_complexity)]
    fn ingest_period(
        &self,
        period: Period,
        observations: &[&RawObservation],
        panel: &PricePanel,
        registry: &IdentityRegistry,
        report: &mut RunReport,
    ) -> Result<(PricePanel, IdentityRegistry, Vec<(ItemId, AuditEvent)>, usize), PeriodGap> {
        let mut registry = registry.clone();
        let mut pending = Vec::new();
        let mut events = Vec::new();
        let mut review_rows = Vec::new();
        let mut ambiguous = Vec::new();
        let mut escalations = Vec::new();

        for obs in observations {
            let price = match (&obs.review, obs.raw_price) {
                (None, Some(price)) => price,
                (review, _) => {
                    let reason = review.clone().unwrap_or_else(|| "no price".to_string());
                    warn!(
                        "Pipeline: review row period={} line={} label='{}': {}",
                        period, obs.location.line, obs.raw_label, reason
                    );
                    review_rows.push(ReviewRow {
                        period,
                        source_document_id: obs.source_document_id.clone(),
                        line: obs.location.line,
                        section: obs.location.section.clone(),
                        raw_label: obs.raw_label.clone(),
                        reason,
                    });
                    continue;
                }
            };

            let label = self.normalizer.normalize(obs);
            let outcome = self.matcher.match_label(&label, period, &mut registry, &self.aliases);
            PipelineMetrics::record_match(outcome.decision.as_str());

            if label.ambiguous {
                warn!(
                    "Pipeline: ambiguous label period={} raw='{}' -> {}",
                    period, obs.raw_label, outcome.identity_id
                );
                ambiguous.push(AmbiguousLabel {
                    period,
                    raw_label: obs.raw_label.clone(),
                    raw_unit: obs.raw_unit.clone(),
                    identity_id: outcome.identity_id,
                });
            }
            if let MatchDecision::Alias { alias, target } = &outcome.decision {
                events.push((
                    outcome.identity_id,
                    AuditEvent::AliasResolved { period, alias: alias.clone(), target: target.clone() },
                ));
            }
            if outcome.escalated() {
                let resolution = outcome.decision.as_str().to_string();
                events.push((
                    outcome.identity_id,
                    AuditEvent::BelowThresholdMatch {
                        period,
                        label: label.match_key(),
                        candidates: outcome.near_misses.clone(),
                        resolution: resolution.clone(),
                    },
                ));
                escalations.push(Escalation {
                    period,
                    label: label.match_key(),
                    resolved_to: outcome.identity_id,
                    resolution,
                    candidates: outcome.near_misses.clone(),
                });
            }

            pending.push(PendingCell {
                identity_id: outcome.identity_id,
                price,
                unit: label.unit_basis(),
                source_document_id: obs.source_document_id.clone(),
                confidence: outcome.confidence,
            });
        }

        let mut panel = panel.clone();
        for cell in &pending {
            if let Err(err) = panel.insert(
                cell.identity_id,
                period,
                cell.price,
                cell.unit,
                &cell.source_document_id,
                cell.confidence,
            ) {
                error!("Pipeline: period {} rejected: {}", period, err);
                return Err(PeriodGap {
                    period,
                    reason: GapReason::DuplicateCell { identity_id: err.identity_id, detail: err.to_string() },
                });
            }
        }

        let inserted = pending.len();
        report.review_rows.extend(review_rows);
        report.ambiguous_labels.extend(ambiguous);
        report.escalations.extend(escalations);
        Ok((panel, registry, events, inserted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline() -> Pipeline {
        Pipeline::new(PipelineConfig::default(), Arc::new(RuleSet::builtin()), AliasTable::default())
    }

    fn doc(period: &str, text: &str) -> SourceDocument {
        SourceDocument::new(period.parse().unwrap(), text.as_bytes().to_vec())
    }

    #[tokio::test]
    async fn test_empty_input_is_an_error() {
        let result = pipeline().run(Vec::new(), &[]).await;
        assert!(matches!(result, Err(PipelineError::NoDocuments)));
    }

    #[tokio::test]
    async fn test_duplicate_rows_reject_period() {
        let docs = vec![
            doc("2019", "COMMISSARY PRICE LIST\nSOAP BAR 3OZ 0.79\nRAMEN NOODLES 0.30\n"),
            doc("2020", "COMMISSARY PRICE LIST\nSOAP BAR 3OZ 0.89\nSOAP BAR 3OZ 0.99\nRAMEN NOODLES 0.32\n"),
            doc("2021", "COMMISSARY PRICE LIST\nSOAP BAR 3OZ 0.95\nRAMEN NOODLES 0.35\n"),
            doc("2022", "COMMISSARY PRICE LIST\nSOAP BAR 3OZ 0.99\nRAMEN NOODLES 0.36\n"),
        ];
        let output = pipeline().run(docs, &[]).await.unwrap();
        assert_eq!(output.report.gaps.len(), 1);
        assert!(matches!(output.report.gaps[0].reason, GapReason::DuplicateCell { .. }));
        assert_eq!(output.report.gaps[0].period, "2020".parse().unwrap());
        assert!(output.panel.period_prices("2020".parse().unwrap()).is_empty());
        assert_eq!(output.index_points.len(), 3);
    }
}
