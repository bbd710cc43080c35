//! Per-item price histories and recurrent increase summaries.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use super::{price_relative, resolved_prices};
use crate::constants::{CORRECTION_DROP_PCT, CORRECTION_SPIKE_PCT, EXTREME_CUMULATIVE_PCT};
use crate::domain::{Category, ItemId, Period, PeriodRange, PricePanelCell};
use crate::pipeline::processing::matcher::IdentityRegistry;
use crate::pipeline::processing::panel::PricePanel;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemInflationPoint {
    pub period: Period,
    pub price: Decimal,
    /// Relative to the previous observation of this item; `None` at the first.
    pub relative: Option<f64>,
    pub change_pct: Option<f64>,
    /// Change since the item's first observation in the range.
    pub cumulative_pct: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemInflation {
    pub identity_id: ItemId,
    pub name: String,
    pub category: Category,
    pub points: Vec<ItemInflationPoint>,
}

impl ItemInflation {
    /// Period-over-period changes, skipping links that could not be priced.
    pub fn changes(&self) -> impl Iterator<Item = (Period, f64)> + '_ {
        self.points.iter().filter_map(|p| p.change_pct.map(|c| (p.period, c)))
    }

    pub fn latest_cumulative_pct(&self) -> Option<f64> {
        self.points.last().and_then(|p| p.cumulative_pct)
    }
}

/// Price history of every surviving identity observed in at least two
/// periods of `range`, ordered by identity id.
pub fn item_inflation(panel: &PricePanel, registry: &IdentityRegistry, range: PeriodRange) -> Vec<ItemInflation> {
    let mut histories: BTreeMap<ItemId, Vec<&PricePanelCell>> = BTreeMap::new();
    for period in panel.periods().into_iter().filter(|p| range.contains(p)) {
        for (id, cell) in resolved_prices(panel, period, Some(registry)) {
            histories.entry(id).or_default().push(cell);
        }
    }

    let items: Vec<ItemInflation> = histories
        .into_iter()
        .filter(|(_, cells)| cells.len() >= 2)
        .map(|(identity_id, cells)| {
            let identity = registry.get(identity_id);
            let name = identity
                .and_then(|i| i.most_recent_label())
                .map(|l| l.normalized_name.clone())
                .unwrap_or_else(|| identity_id.to_string());
            let category = identity.map(|i| i.category).unwrap_or(Category::Other);

            let first = cells[0];
            let points = cells
                .iter()
                .enumerate()
                .map(|(i, cell)| {
                    let relative = i.checked_sub(1).and_then(|prev| price_relative(cells[prev], cell));
                    let cumulative = if i == 0 { Some(1.0) } else { price_relative(first, cell) };
                    ItemInflationPoint {
                        period: cell.period,
                        price: cell.price,
                        relative,
                        change_pct: relative.map(to_pct),
                        cumulative_pct: cumulative.map(to_pct),
                    }
                })
                .collect();
            ItemInflation { identity_id, name, category, points }
        })
        .collect();
    debug!("item_inflation: {} items with two or more observations", items.len());
    items
}

fn to_pct(relative: f64) -> f64 {
    (relative - 1.0) * 100.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceTrend {
    /// Every priced link went up.
    ConsistentIncreaser,
    /// At least one link above +100% on a widely spread history.
    Spiker,
    Volatile,
    Steady,
}

/// How often and how hard one item's price went up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurrentIncrease {
    pub identity_id: ItemId,
    pub name: String,
    pub category: Category,
    pub links: usize,
    pub increasing_links: usize,
    /// Links whose change exceeded the significance threshold.
    pub significant_increases: usize,
    /// Longest streak of consecutive increasing links.
    pub longest_increasing_run: usize,
    pub mean_change_pct: f64,
    pub max_change_pct: f64,
    pub std_change_pct: f64,
    pub cumulative_pct: Option<f64>,
    pub trend: PriceTrend,
}

impl RecurrentIncrease {
    pub fn consistency(&self) -> f64 {
        if self.links == 0 {
            0.0
        } else {
            self.increasing_links as f64 / self.links as f64
        }
    }
}

/// Summaries for every item with at least one priced link, most recurrent
/// first: by increasing links, then longest run, then mean change.
pub fn recurrent_increases(items: &[ItemInflation], significant_pct: f64) -> Vec<RecurrentIncrease> {
    let mut out: Vec<RecurrentIncrease> = items
        .iter()
        .filter_map(|item| {
            let changes: Vec<f64> = item.changes().map(|(_, c)| c).collect();
            if changes.is_empty() {
                return None;
            }
            let n = changes.len() as f64;
            let mean = changes.iter().sum::<f64>() / n;
            let std = (changes.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / n).sqrt();
            let max = changes.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let increasing = changes.iter().filter(|c| **c > 0.0).count();

            let mut run = 0;
            let mut longest = 0;
            for change in &changes {
                run = if *change > 0.0 { run + 1 } else { 0 };
                longest = longest.max(run);
            }

            let trend = if increasing == changes.len() {
                PriceTrend::ConsistentIncreaser
            } else if max > 100.0 && std > 50.0 {
                PriceTrend::Spiker
            } else if mean != 0.0 && std > mean.abs() * 0.5 {
                PriceTrend::Volatile
            } else {
                PriceTrend::Steady
            };

            Some(RecurrentIncrease {
                identity_id: item.identity_id,
                name: item.name.clone(),
                category: item.category,
                links: changes.len(),
                increasing_links: increasing,
                significant_increases: changes.iter().filter(|c| **c > significant_pct).count(),
                longest_increasing_run: longest,
                mean_change_pct: mean,
                max_change_pct: max,
                std_change_pct: std,
                cumulative_pct: item.latest_cumulative_pct(),
                trend,
            })
        })
        .collect();

    out.sort_by(|a, b| {
        b.increasing_links
            .cmp(&a.increasing_links)
            .then(b.longest_increasing_run.cmp(&a.longest_increasing_run))
            .then(b.mean_change_pct.total_cmp(&a.mean_change_pct))
            .then(a.identity_id.cmp(&b.identity_id))
    });
    out
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PriceAnomaly {
    /// A large increase undone in part by the following link.
    Correction { identity_id: ItemId, period: Period, increase_pct: f64, following_change_pct: f64 },
    /// Cumulative change at the last observation is implausibly large.
    ExtremeCumulative { identity_id: ItemId, period: Period, cumulative_pct: f64 },
}

/// Item histories that look like price corrections or data errors.
pub fn detect_anomalies(items: &[ItemInflation]) -> Vec<PriceAnomaly> {
    let mut out = Vec::new();
    for item in items {
        let changes: Vec<(Period, f64)> = item.changes().collect();
        for pair in changes.windows(2) {
            let ((period, increase), (_, following)) = (pair[0], pair[1]);
            if increase > CORRECTION_SPIKE_PCT && following < CORRECTION_DROP_PCT {
                out.push(PriceAnomaly::Correction {
                    identity_id: item.identity_id,
                    period,
                    increase_pct: increase,
                    following_change_pct: following,
                });
            }
        }
        if let Some(last) = item.points.last() {
            if let Some(cumulative) = last.cumulative_pct.filter(|c| *c > EXTREME_CUMULATIVE_PCT) {
                out.push(PriceAnomaly::ExtremeCumulative {
                    identity_id: item.identity_id,
                    period: last.period,
                    cumulative_pct: cumulative,
                });
            }
        }
    }
    out
}
