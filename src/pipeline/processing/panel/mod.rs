//! Item × period price matrix.
//!
//! At most one current cell per (identity, period). A second insert fails;
//! corrections go through `supersede`, which keeps every earlier version and
//! writes the reason to the audit log.

pub mod table;

pub use table::PanelTable;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};

use crate::domain::{ItemId, MatchConfidence, Period, PeriodRange, PricePanelCell, UnitBasis};
use crate::error::{DuplicateCellError, SupersedeError};
use crate::gateway::audit_log::{AuditEvent, AuditLog};

/// Points at one specific version of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRef {
    pub identity_id: ItemId,
    pub period: Period,
    pub version: u32,
}

/// Replacement values for a supersede.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Correction {
    pub price: Decimal,
    pub unit: UnitBasis,
    pub source_document_id: String,
    pub confidence: MatchConfidence,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PricePanel {
    // Versions in ascending order; the last one is current.
    cells: BTreeMap<(ItemId, Period), Vec<PricePanelCell>>,
}

impl PricePanel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        identity_id: ItemId,
        period: Period,
        price: Decimal,
        unit: UnitBasis,
        source_document_id: &str,
        confidence: MatchConfidence,
    ) -> Result<&PricePanelCell, DuplicateCellError> {
        let versions = self.cells.entry((identity_id, period)).or_default();
        if !versions.is_empty() {
            return Err(DuplicateCellError { identity_id, period });
        }
        versions.push(PricePanelCell {
            identity_id,
            period,
            price,
            unit,
            source_document_id: source_document_id.to_string(),
            confidence,
            version: 1,
            note: None,
        });
        Ok(&versions[0])
    }

    /// Replace the current cell with a new version. `reference` must name the
    /// current version; a stale reference is rejected.
    pub fn supersede(
        &mut self,
        reference: CellRef,
        correction: Correction,
        reason: &str,
        audit: &mut AuditLog,
        recorded_at: DateTime<Utc>,
    ) -> Result<&PricePanelCell, SupersedeError> {
        let CellRef { identity_id, period, version } = reference;
        if reason.trim().is_empty() {
            return Err(SupersedeError::MissingReason);
        }
        let versions = self
            .cells
            .get_mut(&(identity_id, period))
            .filter(|v| !v.is_empty())
            .ok_or(SupersedeError::MissingCell { identity_id, period })?;
        let current = versions[versions.len() - 1].version;
        if current != version {
            return Err(SupersedeError::StaleReference { identity_id, period, current, referenced: version });
        }

        let new_version = current + 1;
        versions.push(PricePanelCell {
            identity_id,
            period,
            price: correction.price,
            unit: correction.unit,
            source_document_id: correction.source_document_id,
            confidence: correction.confidence,
            version: new_version,
            note: Some(reason.to_string()),
        });
        audit.record(
            identity_id,
            recorded_at,
            AuditEvent::Supersede {
                period,
                superseded_version: current,
                new_version,
                reason: reason.to_string(),
            },
        );
        tracing::info!(
            "PricePanel: superseded {} {} v{} -> v{}",
            identity_id,
            period,
            current,
            new_version
        );
        Ok(&versions[versions.len() - 1])
    }

    pub fn contains(&self, identity_id: ItemId, period: Period) -> bool {
        self.cells.get(&(identity_id, period)).is_some_and(|v| !v.is_empty())
    }

    pub fn current(&self, identity_id: ItemId, period: Period) -> Option<&PricePanelCell> {
        self.cells.get(&(identity_id, period)).and_then(|v| v.last())
    }

    /// Every version of one cell, oldest first.
    pub fn history(&self, identity_id: ItemId, period: Period) -> &[PricePanelCell] {
        self.cells.get(&(identity_id, period)).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Current cells, ordered by identity then period. The iterator borrows the
    /// panel and can be cloned or re-created to restart.
    pub fn query(
        &self,
        identity_id: Option<ItemId>,
        range: PeriodRange,
    ) -> impl Iterator<Item = &PricePanelCell> + Clone + '_ {
        self.cells
            .iter()
            .filter(move |((id, period), _)| identity_id.map_or(true, |want| *id == want) && range.contains(period))
            .filter_map(|(_, versions)| versions.last())
    }

    /// Every stored version, ordered by identity, period, version.
    pub fn all_versions(&self) -> impl Iterator<Item = &PricePanelCell> + '_ {
        self.cells.values().flatten()
    }

    /// Current cells of one period keyed by identity.
    pub fn period_prices(&self, period: Period) -> BTreeMap<ItemId, &PricePanelCell> {
        self.cells
            .iter()
            .filter(|((_, p), _)| *p == period)
            .filter_map(|((id, _), versions)| versions.last().map(|cell| (*id, cell)))
            .collect()
    }

    pub fn periods(&self) -> BTreeSet<Period> {
        self.cells.keys().map(|(_, p)| *p).collect()
    }

    pub fn identities(&self) -> BTreeSet<ItemId> {
        self.cells.keys().map(|(id, _)| *id).collect()
    }

    /// Number of current cells.
    pub fn len(&self) -> usize {
        self.cells.values().filter(|v| !v.is_empty()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Used by the table loader, which validates version order first.
    pub(crate) fn push_version(&mut self, cell: PricePanelCell) {
        self.cells.entry((cell.identity_id, cell.period)).or_default().push(cell);
    }
}
