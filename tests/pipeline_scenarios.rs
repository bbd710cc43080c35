use anyhow::Result;
use chrono::{TimeZone, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

use commissary_index::config::PipelineConfig;
use commissary_index::domain::{Period, RawObservation};
use commissary_index::error::{ParseError, ParseFailureReason, PipelineError};
use commissary_index::gateway::audit_log::AuditEvent;
use commissary_index::pipeline::parser::{CatalogParser, Parser};
use commissary_index::pipeline::processing::index::{ReferencePoint, ReferenceSeries};
use commissary_index::pipeline::processing::matcher::AliasTable;
use commissary_index::pipeline::processing::normalize::RuleSet;
use commissary_index::pipeline::report::GapReason;
use commissary_index::pipeline::{Pipeline, SourceDocument};
use commissary_index::storage::PanelStore;

fn period(s: &str) -> Period {
    s.parse().unwrap()
}

fn price_list(period_label: &str, rows: &[(&str, &str)]) -> SourceDocument {
    let mut text = format!("UNIT COMMISSARY PRICE LIST - {}\n\nHYGIENE\n", period_label);
    for (label, price) in rows {
        text.push_str(&format!("{} {}\n", label, price));
    }
    SourceDocument::new(period(period_label), text.into_bytes())
}

fn basket(period_label: &str, soap: &str) -> SourceDocument {
    price_list(
        period_label,
        &[
            ("SOAP BAR 3OZ", soap),
            ("TOOTHPASTE 4OZ", "1.10"),
            ("DEODORANT 2.6OZ", "1.25"),
            ("SHAMPOO 12 FL OZ", "2.00"),
            ("COMB", "0.25"),
        ],
    )
}

fn pipeline(aliases: AliasTable) -> Pipeline {
    Pipeline::new(PipelineConfig::default(), Arc::new(RuleSet::builtin()), aliases)
}

fn cpi() -> ReferenceSeries {
    ReferenceSeries::new(
        "CPI-U",
        vec![
            ReferencePoint { period: period("2019"), value: Some(255.657) },
            ReferencePoint { period: period("2020"), value: Some(258.811) },
        ],
    )
}

#[tokio::test]
async fn test_soap_price_rise_drives_index() -> Result<()> {
    let docs = vec![
        price_list("2019", &[("SOAP BAR 3OZ", "0.79")]),
        price_list("2020", &[("SOAP BAR 3OZ", "0.89")]),
    ];
    let output = pipeline(AliasTable::default()).run(docs, &[cpi()]).await?;

    assert_eq!(output.registry.len(), 1);
    assert_eq!(output.panel.len(), 2);
    assert_eq!(output.index_points.len(), 2);
    assert_eq!(output.index_points[0].commissary_index_value, 100.0);
    assert!((output.index_points[1].commissary_index_value - 112.66).abs() < 0.01);
    assert_eq!(output.index_points[1].reference_index_value, Some(258.811));

    // One item is below the minimum basket.
    assert!(output.index_points[1].low_confidence);
    assert_eq!(output.report.low_confidence_periods, vec![period("2019"), period("2020")]);

    let divergence = output.comparisons[1].cumulative_divergence.unwrap();
    assert!((divergence - 1.1266 / (258.811 / 255.657)).abs() < 0.001);

    assert_eq!(output.item_inflation.len(), 1);
    assert!((output.item_inflation[0].points[1].change_pct.unwrap() - 12.66).abs() < 0.01);
    assert_eq!(output.recurrent_increases[0].increasing_links, 1);
    assert_eq!(output.recurrent_increases[0].significant_increases, 1);
    assert!(output.anomalies.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_full_basket_is_not_low_confidence() -> Result<()> {
    let docs = vec![basket("2019", "0.79"), basket("2020", "0.89"), basket("2021", "0.89")];
    let output = pipeline(AliasTable::default()).run(docs, &[]).await?;

    assert_eq!(output.registry.len(), 5);
    assert!(output.index_points.iter().all(|p| !p.low_confidence));
    assert_eq!(output.index_points[1].basket_size, 5);
    let chained = output.index_points[2].commissary_index_value;
    assert!((chained - output.index_points[1].commissary_index_value).abs() < 1e-9);
    assert!(output.report.gaps.is_empty());
    assert_eq!(output.ingestions.len(), 3);
    Ok(())
}

#[tokio::test]
async fn test_unrecognized_layout_becomes_gap() -> Result<()> {
    let docs = vec![
        basket("2019", "0.79"),
        basket("2020", "0.85"),
        SourceDocument::new(period("2021"), b"Scanned page, nothing legible here".to_vec()),
        basket("2022", "0.89"),
        basket("2023", "0.89"),
    ];
    let output = pipeline(AliasTable::default()).run(docs, &[]).await?;

    assert_eq!(output.report.gap_periods(), vec![period("2021")]);
    match &output.report.gaps[0].reason {
        GapReason::Parse(err) => assert_eq!(err.reason, ParseFailureReason::StructuralMismatch),
        other => panic!("unexpected gap reason: {:?}", other),
    }
    let periods: Vec<Period> = output.index_points.iter().map(|p| p.period).collect();
    assert_eq!(periods, vec![period("2019"), period("2020"), period("2022"), period("2023")]);
    // 2020 -> 2022 links across the gap.
    assert_eq!(output.index_points[2].basket_size, 5);
    Ok(())
}

#[tokio::test]
async fn test_too_many_gaps_aborts_run() {
    let docs = vec![
        basket("2019", "0.79"),
        SourceDocument::new(period("2020"), Vec::new()),
        SourceDocument::new(period("2021"), vec![0xff, 0xfe, 0x00]),
        basket("2022", "0.89"),
    ];
    let result = pipeline(AliasTable::default()).run(docs, &[]).await;
    match result {
        Err(PipelineError::InsufficientCoverage(err)) => {
            assert_eq!(err.failed, 2);
            assert_eq!(err.total, 4);
        }
        other => panic!("expected insufficient coverage, got {:?}", other.map(|o| o.report)),
    }
}

#[tokio::test]
async fn test_renamed_item_escalates_then_alias_resolves() -> Result<()> {
    let docs = || {
        vec![
            price_list("2019", &[("SOAP BAR 3OZ", "0.79")]),
            price_list("2020", &[("IVORY SOAP BAR 3OZ", "0.89")]),
        ]
    };

    let output = pipeline(AliasTable::default()).run(docs(), &[]).await?;
    assert_eq!(output.registry.len(), 2);
    assert_eq!(output.report.escalations.len(), 1);
    assert_eq!(output.report.unreviewed_identities.len(), 1);
    assert!(output
        .audit
        .entries()
        .iter()
        .any(|e| matches!(e.event, AuditEvent::BelowThresholdMatch { .. })));
    // Nothing links 2019 to 2020, so the index carries forward.
    assert_eq!(output.index_points[1].commissary_index_value, 100.0);
    assert_eq!(output.index_points[1].basket_size, 0);
    assert!(output.index_points[1].low_confidence);

    let aliases = AliasTable::from_toml_str(
        r#"
        [[alias]]
        alias = "Ivory Soap Bar"
        target = "soap bar"
        "#,
    )?;
    let output = pipeline(aliases).run(docs(), &[]).await?;
    assert_eq!(output.registry.len(), 1);
    assert!((output.index_points[1].commissary_index_value - 112.66).abs() < 0.01);
    assert!(output
        .audit
        .entries()
        .iter()
        .any(|e| matches!(e.event, AuditEvent::AliasResolved { .. })));
    assert_eq!(output.report.escalations[0].resolution, "alias");
    assert!(matches!(
        output.audit.entries()[0].event,
        AuditEvent::AliasResolved { ref target, .. } if target == "soap bar"
    ));
    Ok(())
}

#[tokio::test]
async fn test_rerun_is_deterministic() -> Result<()> {
    let docs = || {
        vec![
            basket("2021", "0.89"),
            basket("2019", "0.79"),
            price_list("2020", &[("SOAP BAR 3OZ", "0.85"), ("IVORY SOAP BAR 3OZ", "0.99"), ("COMB", "0.25")]),
        ]
    };
    let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let p = pipeline(AliasTable::default());

    let first = p.run_with_state(Default::default(), docs(), &[], at).await?;
    let second = p.run_with_state(Default::default(), docs(), &[], at).await?;

    assert_eq!(first.panel_table(), second.panel_table());
    assert_eq!(first.registry, second.registry);
    assert_eq!(first.audit, second.audit);
    assert_eq!(first.index_points, second.index_points);
    assert_eq!(first.report, second.report);
    Ok(())
}

/// Delegates to the catalog parser but stalls on one period, and tracks how
/// many parses run at once.
struct StallingParser {
    stall_on: Period,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl StallingParser {
    fn new(stall_on: Period) -> Self {
        Self { stall_on, in_flight: AtomicUsize::new(0), max_in_flight: AtomicUsize::new(0) }
    }
}

impl Parser for StallingParser {
    fn parse(&self, bytes: &[u8], period: Period) -> Result<Vec<RawObservation>, ParseError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if period == self.stall_on {
            std::thread::sleep(Duration::from_secs(3));
        }
        let result = CatalogParser::new().parse(bytes, period);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

#[tokio::test]
async fn test_slow_document_times_out_as_gap() -> Result<()> {
    let config = PipelineConfig { parse_timeout_secs: 1, parse_pool_size: 1, ..PipelineConfig::default() };
    let parser = Arc::new(StallingParser::new(period("2021")));
    let p = Pipeline::new(config, Arc::new(RuleSet::builtin()), AliasTable::default()).with_parser(parser.clone());

    let docs = vec![
        basket("2019", "0.79"),
        basket("2020", "0.85"),
        basket("2021", "0.87"),
        basket("2022", "0.89"),
    ];
    let output = p.run(docs, &[]).await?;
    assert_eq!(output.report.gap_periods(), vec![period("2021")]);
    match &output.report.gaps[0].reason {
        GapReason::Parse(err) => assert_eq!(err.reason, ParseFailureReason::TimedOut),
        other => panic!("unexpected gap reason: {:?}", other),
    }
    assert_eq!(output.index_points.len(), 3);
    // The stalled parse keeps its pool slot until it really finishes.
    assert_eq!(parser.max_in_flight.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn test_bad_document_fails_its_whole_period() -> Result<()> {
    let docs = vec![
        basket("2019", "0.79"),
        basket("2020", "0.85"),
        SourceDocument::new(period("2020"), b"Scanned page, nothing legible here".to_vec()),
        basket("2021", "0.87"),
        basket("2022", "0.89"),
    ];
    let output = pipeline(AliasTable::default()).run(docs, &[]).await?;

    assert_eq!(output.report.gap_periods(), vec![period("2020")]);
    assert!(matches!(output.report.gaps[0].reason, GapReason::Parse(_)));
    assert!(output.panel.period_prices(period("2020")).is_empty());
    assert!(output.ingestions.iter().all(|r| r.period != period("2020")));
    Ok(())
}

#[tokio::test]
async fn test_row_repeated_across_documents_rejects_period() -> Result<()> {
    let docs = vec![
        basket("2019", "0.79"),
        basket("2020", "0.85"),
        price_list("2020", &[("COMB", "0.30")]),
        basket("2021", "0.87"),
        basket("2022", "0.89"),
    ];
    let output = pipeline(AliasTable::default()).run(docs, &[]).await?;

    assert_eq!(output.report.gap_periods(), vec![period("2020")]);
    assert!(matches!(output.report.gaps[0].reason, GapReason::DuplicateCell { .. }));
    assert!(output.panel.period_prices(period("2020")).is_empty());
    assert_eq!(output.registry.len(), 5);
    Ok(())
}

#[tokio::test]
async fn test_retry_on_saved_state_is_a_no_op() -> Result<()> {
    let dir = tempdir()?;
    let p = pipeline(AliasTable::default());
    let docs = || vec![basket("2019", "0.79"), basket("2020", "0.85")];

    let first = p.run(docs(), &[]).await?;

    let retried = p.run_with_state(first.clone().into_state(), docs(), &[], Utc::now()).await?;
    assert_eq!(retried.report.skipped_documents.len(), 2);
    assert!(retried.report.gaps.is_empty());
    assert_eq!(retried.report.cells_inserted, 0);
    assert_eq!(retried.panel, first.panel);
    assert_eq!(retried.index_points, first.index_points);

    let store = PanelStore::open_at_root(dir.path())?;
    store.save_run(&first)?;
    let from_store = p.run_with_state(store.load_state()?, docs(), &[], Utc::now()).await?;
    assert_eq!(from_store.report.skipped_documents.len(), 2);
    assert_eq!(from_store.panel, first.panel);
    assert_eq!(from_store.registry, first.registry);
    assert!(from_store.ingestions.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_incremental_run_from_store() -> Result<()> {
    let dir = tempdir()?;
    let p = pipeline(AliasTable::default());

    let first = p.run(vec![basket("2019", "0.79"), basket("2020", "0.85")], &[]).await?;
    {
        let store = PanelStore::open_at_root(dir.path())?;
        store.save_run(&first)?;
        for record in &first.ingestions {
            assert!(store.has_ingestion(&record.ingestion_key)?);
        }
    }

    let store = PanelStore::open_at_root(dir.path())?;
    let state = store.load_state()?;
    assert_eq!(state.panel, first.panel);
    assert_eq!(state.registry, first.registry);

    let second = p.run_with_state(state, vec![basket("2021", "0.89")], &[], Utc::now()).await?;
    assert_eq!(second.registry.len(), 5);
    assert_eq!(second.report.identities_created, 0);
    assert_eq!(second.panel.len(), 15);
    assert_eq!(second.index_points.len(), 3);

    store.save_run(&second)?;
    assert_eq!(store.load_panel()?.len(), 15);
    Ok(())
}
