use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::{IndexPoint, Period};

/// One value of an externally supplied index; `None` marks a known gap.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferencePoint {
    pub period: Period,
    pub value: Option<f64>,
}

/// A reference index series (e.g. "CPI-U", "Food at home") keyed by period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceSeries {
    pub series_id: String,
    values: BTreeMap<Period, Option<f64>>,
}

impl ReferenceSeries {
    /// Later points for the same period replace earlier ones. Non-finite or
    /// non-positive values are treated as gaps.
    pub fn new(series_id: impl Into<String>, points: impl IntoIterator<Item = ReferencePoint>) -> Self {
        let values = points
            .into_iter()
            .map(|p| (p.period, p.value.filter(|v| v.is_finite() && *v > 0.0)))
            .collect();
        Self { series_id: series_id.into(), values }
    }

    pub fn value_at(&self, period: Period) -> Option<f64> {
        self.values.get(&period).copied().flatten()
    }

    pub fn points(&self) -> impl Iterator<Item = ReferencePoint> + '_ {
        self.values.iter().map(|(period, value)| ReferencePoint { period: *period, value: *value })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Fill `reference_index_value` by exact period key. Periods the series
    /// lacks stay `None`; nothing is interpolated.
    pub fn join(&self, points: &mut [IndexPoint]) {
        for point in points.iter_mut() {
            point.reference_index_value = self.value_at(point.period);
        }
    }
}
