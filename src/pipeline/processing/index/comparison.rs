use serde::{Deserialize, Serialize};

use crate::constants::INDEX_BASE;
use crate::domain::{IndexPoint, Period};

/// Commissary vs reference statistics for one period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonPoint {
    pub period: Period,
    pub commissary_index_value: f64,
    pub reference_index_value: Option<f64>,
    pub commissary_link_relative: Option<f64>,
    pub reference_link_relative: Option<f64>,
    /// Commissary link relative ÷ reference link relative.
    pub link_ratio: Option<f64>,
    /// (commissary / base) ÷ (reference / reference at base).
    pub cumulative_divergence: Option<f64>,
    pub commissary_change_pct: Option<f64>,
    pub reference_change_pct: Option<f64>,
    /// Commissary minus reference period-over-period change, in points.
    pub change_gap_pp: Option<f64>,
    pub commissary_cumulative_pct: f64,
    pub reference_cumulative_pct: Option<f64>,
    pub cumulative_gap_pp: Option<f64>,
    pub low_confidence: bool,
}

fn pct(relative: f64) -> f64 {
    (relative - 1.0) * 100.0
}

/// Derive comparison statistics from an ordered index sequence whose first
/// point is the base period.
pub fn compare(points: &[IndexPoint]) -> Vec<ComparisonPoint> {
    let Some(base) = points.first() else {
        return Vec::new();
    };
    let reference_base = base.reference_index_value;

    points
        .iter()
        .enumerate()
        .map(|(i, point)| {
            let previous = i.checked_sub(1).map(|j| &points[j]);
            let reference_link_relative = match (previous.and_then(|p| p.reference_index_value), point.reference_index_value) {
                (Some(prev), Some(cur)) => Some(cur / prev),
                _ => None,
            };
            let commissary_link_relative = point.link_relative;
            let link_ratio = match (commissary_link_relative, reference_link_relative) {
                (Some(c), Some(r)) => Some(c / r),
                _ => None,
            };

            let commissary_cumulative = point.commissary_index_value / INDEX_BASE;
            let reference_cumulative = match (reference_base, point.reference_index_value) {
                (Some(base), Some(cur)) => Some(cur / base),
                _ => None,
            };

            let commissary_change_pct = commissary_link_relative.map(pct);
            let reference_change_pct = reference_link_relative.map(pct);
            let reference_cumulative_pct = reference_cumulative.map(pct);

            ComparisonPoint {
                period: point.period,
                commissary_index_value: point.commissary_index_value,
                reference_index_value: point.reference_index_value,
                commissary_link_relative,
                reference_link_relative,
                link_ratio,
                cumulative_divergence: reference_cumulative.map(|r| commissary_cumulative / r),
                commissary_change_pct,
                reference_change_pct,
                change_gap_pp: commissary_change_pct.zip(reference_change_pct).map(|(c, r)| c - r),
                commissary_cumulative_pct: pct(commissary_cumulative),
                reference_cumulative_pct,
                cumulative_gap_pp: reference_cumulative_pct.map(|r| pct(commissary_cumulative) - r),
                low_confidence: point.low_confidence,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(period: &str, value: f64, reference: Option<f64>, link: Option<f64>) -> IndexPoint {
        IndexPoint {
            period: period.parse().unwrap(),
            commissary_index_value: value,
            reference_index_value: reference,
            basket_size: 10,
            link_relative: link,
            low_confidence: false,
        }
    }

    fn close(a: Option<f64>, b: f64) -> bool {
        a.is_some_and(|a| (a - b).abs() < 1e-9)
    }

    #[test]
    fn test_divergence_is_running_product_of_link_ratios() {
        let points = vec![
            point("2019", 100.0, Some(200.0), None),
            point("2020", 110.0, Some(204.0), Some(1.10)),
            point("2021", 121.0, Some(210.12), Some(1.10)),
        ];
        let stats = compare(&points);

        assert!(close(stats[0].cumulative_divergence, 1.0));
        assert_eq!(stats[0].link_ratio, None);

        let product: f64 = stats[1..].iter().map(|s| s.link_ratio.unwrap()).product();
        assert!(close(stats[2].cumulative_divergence, product));

        assert!(close(stats[1].commissary_change_pct, 10.0));
        assert!(close(stats[1].reference_change_pct, 2.0));
        assert!(close(stats[1].change_gap_pp, 8.0));
        assert!((stats[2].commissary_cumulative_pct - 21.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_reference_keeps_later_divergence_defined() {
        let points = vec![
            point("2019", 100.0, Some(200.0), None),
            point("2020", 110.0, None, Some(1.10)),
            point("2021", 121.0, Some(220.0), Some(1.10)),
        ];
        let stats = compare(&points);
        assert_eq!(stats[1].cumulative_divergence, None);
        assert_eq!(stats[1].link_ratio, None);
        assert_eq!(stats[2].reference_link_relative, None);
        assert!(close(stats[2].cumulative_divergence, 1.1));
        assert!(close(stats[2].cumulative_gap_pp, 11.0));
    }

    #[test]
    fn test_missing_base_reference_nulls_divergence() {
        let points = vec![point("2019", 100.0, None, None), point("2020", 105.0, Some(210.0), Some(1.05))];
        let stats = compare(&points);
        assert!(stats.iter().all(|s| s.cumulative_divergence.is_none()));
    }
}
