//! Matched-basket chained price index.
//!
//! For each consecutive pair of periods only items priced in both contribute
//! to the link; the link relative is the geometric mean of their price
//! ratios, and the index chains links forward from 100 at the first period.

pub mod comparison;
pub mod items;
pub mod reference;

pub use comparison::{compare, ComparisonPoint};
pub use items::{
    detect_anomalies, item_inflation, recurrent_increases, ItemInflation, ItemInflationPoint, PriceAnomaly,
    PriceTrend, RecurrentIncrease,
};
pub use reference::{ReferencePoint, ReferenceSeries};

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use crate::config::IndexConfig;
use crate::constants::INDEX_BASE;
use crate::domain::{Category, Essentiality, IndexPoint, ItemId, Period, PeriodRange, PricePanelCell};
use crate::pipeline::processing::matcher::IdentityRegistry;
use crate::pipeline::processing::normalize::RuleSet;
use crate::pipeline::processing::panel::PricePanel;

/// Which identities may enter the basket.
///
/// Category and essentiality criteria read the identity registry; without one
/// attached they admit nothing. With a registry attached, cells of merged
/// identities are priced under the identity they were merged into.
#[derive(Debug, Clone, Default)]
pub struct IdentityFilter<'r> {
    registry: Option<&'r IdentityRegistry>,
    pub identities: Option<BTreeSet<ItemId>>,
    pub category: Option<Category>,
    pub essentiality: Option<Essentiality>,
    /// Only items priced in at least this many periods of the whole panel.
    pub min_periods_observed: usize,
}

impl<'r> IdentityFilter<'r> {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_registry(mut self, registry: &'r IdentityRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn identities(mut self, ids: impl IntoIterator<Item = ItemId>) -> Self {
        self.identities = Some(ids.into_iter().collect());
        self
    }

    pub fn category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    pub fn essentiality(mut self, essentiality: Essentiality) -> Self {
        self.essentiality = Some(essentiality);
        self
    }

    pub fn min_periods_observed(mut self, periods: usize) -> Self {
        self.min_periods_observed = periods;
        self
    }

    fn admits(&self, id: ItemId, panel_coverage: usize) -> bool {
        if panel_coverage < self.min_periods_observed {
            return false;
        }
        if let Some(ids) = &self.identities {
            if !ids.contains(&id) {
                return false;
            }
        }
        if self.category.is_none() && self.essentiality.is_none() {
            return true;
        }
        let Some(identity) = self.registry.and_then(|r| r.get(id)) else {
            return false;
        };
        if self.category.is_some_and(|c| identity.category != c) {
            return false;
        }
        if let Some(wanted) = self.essentiality {
            if identity.most_recent_label().map(|l| l.essentiality) != Some(wanted) {
                return false;
            }
        }
        true
    }
}

/// Ratio of `current` to `previous`, per base unit when both cells carry a
/// quantity of the same unit kind, else per package. `None` when either
/// price is not positive.
pub fn price_relative(previous: &PricePanelCell, current: &PricePanelCell) -> Option<f64> {
    if previous.price <= Decimal::ZERO || current.price <= Decimal::ZERO {
        let bad = if previous.price <= Decimal::ZERO { previous } else { current };
        warn!(
            "IndexEngine: non-positive price {} for {} in {}; excluded from link into {}",
            bad.price, bad.identity_id, bad.period, current.period
        );
        return None;
    }
    let comparable = previous.unit.kind == current.unit.kind
        && previous.unit.quantity.is_some_and(|q| !q.is_zero())
        && current.unit.quantity.is_some_and(|q| !q.is_zero());
    let (prev, cur) = if comparable {
        (previous.unit_price(), current.unit_price())
    } else {
        (previous.price, current.price)
    };
    let (prev, cur) = (prev.to_f64()?, cur.to_f64()?);
    if prev <= 0.0 || cur <= 0.0 {
        return None;
    }
    Some(cur / prev)
}

/// Current cells for `period` keyed by surviving identity. A survivor that is
/// priced both under its own id and under a merged id in the same period is
/// left out of that period.
fn resolved_prices<'p>(
    panel: &'p PricePanel,
    period: Period,
    registry: Option<&IdentityRegistry>,
) -> BTreeMap<ItemId, &'p PricePanelCell> {
    let cells = panel.period_prices(period);
    let Some(registry) = registry else {
        return cells;
    };
    let mut resolved: BTreeMap<ItemId, &PricePanelCell> = BTreeMap::new();
    let mut conflicted = BTreeSet::new();
    for (id, cell) in cells {
        let survivor = registry.resolve(id);
        if resolved.insert(survivor, cell).is_some() {
            conflicted.insert(survivor);
        }
    }
    for survivor in conflicted {
        warn!("IndexEngine: {} priced twice in {} after merges; left out of that period", survivor, period);
        resolved.remove(&survivor);
    }
    resolved
}

fn geometric_mean(ratios: &[f64]) -> Option<f64> {
    if ratios.is_empty() {
        return None;
    }
    let log_sum: f64 = ratios.iter().map(|r| r.ln()).sum();
    Some((log_sum / ratios.len() as f64).exp())
}

/// A category sub-index joined against its mapped reference series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryIndex {
    pub category: Category,
    pub reference_series: String,
    pub points: Vec<IndexPoint>,
    pub comparisons: Vec<ComparisonPoint>,
}

#[derive(Debug, Clone)]
pub struct IndexEngine {
    pub min_basket_size: usize,
    pub low_coverage_fraction: f64,
}

impl Default for IndexEngine {
    fn default() -> Self {
        Self::from_config(&IndexConfig::default())
    }
}

impl IndexEngine {
    pub fn from_config(config: &IndexConfig) -> Self {
        Self { min_basket_size: config.min_basket_size, low_coverage_fraction: config.low_coverage_fraction }
    }

    fn low_confidence(&self, basket_size: usize, tracked: usize) -> bool {
        basket_size < self.min_basket_size || (basket_size as f64) < self.low_coverage_fraction * tracked as f64
    }

    /// Ordered index points for every panel period inside `range`. The first
    /// such period is the base.
    pub fn compute_index(&self, panel: &PricePanel, filter: &IdentityFilter<'_>, range: PeriodRange) -> Vec<IndexPoint> {
        let all_prices: BTreeMap<Period, BTreeMap<ItemId, &PricePanelCell>> = panel
            .periods()
            .into_iter()
            .map(|p| (p, resolved_prices(panel, p, filter.registry)))
            .collect();

        let mut coverage: BTreeMap<ItemId, usize> = BTreeMap::new();
        for id in all_prices.values().flat_map(|cells| cells.keys()) {
            *coverage.entry(*id).or_default() += 1;
        }
        let admitted: BTreeSet<ItemId> = coverage
            .iter()
            .filter(|(id, n)| filter.admits(**id, **n))
            .map(|(id, _)| *id)
            .collect();

        let periods: Vec<Period> = all_prices.keys().copied().filter(|p| range.contains(p)).collect();
        let prices: Vec<BTreeMap<ItemId, &PricePanelCell>> = periods
            .iter()
            .map(|p| {
                all_prices[p]
                    .iter()
                    .filter(|(id, _)| admitted.contains(id))
                    .map(|(id, cell)| (*id, *cell))
                    .collect()
            })
            .collect();
        let tracked: BTreeSet<ItemId> = prices.iter().flat_map(|cells| cells.keys().copied()).collect();

        let mut points = Vec::with_capacity(periods.len());
        let mut value = INDEX_BASE;
        for (i, period) in periods.iter().enumerate() {
            if i == 0 {
                let basket_size = prices[0].len();
                points.push(IndexPoint {
                    period: *period,
                    commissary_index_value: value,
                    reference_index_value: None,
                    basket_size,
                    link_relative: None,
                    low_confidence: self.low_confidence(basket_size, tracked.len()),
                });
                continue;
            }

            let (previous, current) = (&prices[i - 1], &prices[i]);
            let ratios: Vec<f64> = current
                .iter()
                .filter_map(|(id, cell)| previous.get(id).and_then(|prev| price_relative(prev, cell)))
                .collect();
            let link_relative = geometric_mean(&ratios);
            match link_relative {
                Some(relative) => value *= relative,
                None => warn!("IndexEngine: empty link into {}; carrying index forward", period),
            }
            let basket_size = ratios.len();
            debug!(
                "IndexEngine: period={} basket={} relative={:?} value={:.4}",
                period, basket_size, link_relative, value
            );
            points.push(IndexPoint {
                period: *period,
                commissary_index_value: value,
                reference_index_value: None,
                basket_size,
                link_relative,
                low_confidence: link_relative.is_none() || self.low_confidence(basket_size, tracked.len()),
            });
        }
        points
    }

    /// `compute_index` joined against a reference series when one is given.
    pub fn compute_with_reference(
        &self,
        panel: &PricePanel,
        filter: &IdentityFilter<'_>,
        range: PeriodRange,
        reference: Option<&ReferenceSeries>,
    ) -> Vec<IndexPoint> {
        let mut points = self.compute_index(panel, filter, range);
        if let Some(series) = reference {
            series.join(&mut points);
        }
        points
    }

    /// One sub-index per category present in the registry, each compared with
    /// the reference series the rule set maps it to.
    pub fn category_indices(
        &self,
        panel: &PricePanel,
        registry: &IdentityRegistry,
        rules: &RuleSet,
        range: PeriodRange,
        references: &BTreeMap<String, ReferenceSeries>,
        min_periods_observed: usize,
    ) -> Vec<CategoryIndex> {
        let present: BTreeSet<Category> = registry.iter().map(|i| i.category).collect();
        Category::ALL
            .iter()
            .filter(|c| present.contains(c))
            .map(|&category| {
                let filter = IdentityFilter::all()
                    .with_registry(registry)
                    .category(category)
                    .min_periods_observed(min_periods_observed);
                let reference_series = rules.reference_series_for(category).to_string();
                let points =
                    self.compute_with_reference(panel, &filter, range, references.get(&reference_series));
                let comparisons = compare(&points);
                CategoryIndex { category, reference_series, points, comparisons }
            })
            .filter(|index| !index.points.is_empty())
            .collect()
    }
}

/// `IndexEngine::default().compute_index(..)`.
pub fn compute_index(panel: &PricePanel, filter: &IdentityFilter<'_>, range: PeriodRange) -> Vec<IndexPoint> {
    IndexEngine::default().compute_index(panel, filter, range)
}
