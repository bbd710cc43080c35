use serde::{Deserialize, Serialize};

use super::PricePanel;
use crate::domain::PricePanelCell;
use crate::error::PanelTableError;

/// The persisted layout of a panel: one row per stored cell version, ordered
/// by identity, period, version. Stable for a given rule-table version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelTable {
    pub rules_version: String,
    pub rows: Vec<PricePanelCell>,
}

impl PanelTable {
    pub fn from_panel(panel: &PricePanel, rules_version: &str) -> Self {
        Self { rules_version: rules_version.to_string(), rows: panel.all_versions().cloned().collect() }
    }

    /// Rebuild the panel. Rows may arrive in any order but each cell's
    /// versions must run 1, 2, 3, ... without gaps.
    pub fn into_panel(self) -> Result<PricePanel, PanelTableError> {
        let mut rows = self.rows;
        rows.sort_by_key(|c| (c.identity_id, c.period, c.version));

        let mut panel = PricePanel::new();
        for cell in rows {
            let expected = panel.history(cell.identity_id, cell.period).len() as u32 + 1;
            if cell.version != expected {
                return Err(PanelTableError::VersionGap {
                    identity_id: cell.identity_id,
                    period: cell.period,
                    expected,
                    found: cell.version,
                });
            }
            panel.push_version(cell);
        }
        Ok(panel)
    }

    pub fn to_json(&self) -> Result<String, PanelTableError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, PanelTableError> {
        Ok(serde_json::from_str(json)?)
    }
}
