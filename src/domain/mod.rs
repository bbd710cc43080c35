//! Data records shared by every pipeline stage.
//!
//! Records are plain data: once a value has been written to the panel it is
//! never mutated, corrections produce new versions.

mod period;

pub use period::{Period, PeriodError, PeriodRange};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Stable arena index of an [`ItemIdentity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub u32);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "item-{:06}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    Each,
    Oz,
    Ct,
    Pack,
    Other,
}

impl UnitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitKind::Each => "each",
            UnitKind::Oz => "oz",
            UnitKind::Ct => "ct",
            UnitKind::Pack => "pack",
            UnitKind::Other => "other",
        }
    }
}

impl std::str::FromStr for UnitKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "each" => Ok(UnitKind::Each),
            "oz" => Ok(UnitKind::Oz),
            "ct" => Ok(UnitKind::Ct),
            "pack" => Ok(UnitKind::Pack),
            "other" => Ok(UnitKind::Other),
            other => Err(format!("unknown unit kind: {}", other)),
        }
    }
}

/// Unit an item is sold in, expressed in base units of `kind`.
///
/// `quantity` is `None` when the label carried no size (a bare "each" item, or
/// a unit we could not convert).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnitBasis {
    pub kind: UnitKind,
    pub quantity: Option<Decimal>,
}

impl UnitBasis {
    pub fn each() -> Self {
        Self { kind: UnitKind::Each, quantity: None }
    }

    pub fn is_compatible_with(&self, other: &UnitBasis) -> bool {
        self.kind == other.kind
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Food,
    Hygiene,
    Stationery,
    Clothing,
    Other,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Food,
        Category::Hygiene,
        Category::Stationery,
        Category::Clothing,
        Category::Other,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Essentiality {
    Essential,
    NonEssential,
}

/// How a panel cell's identity was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchConfidence {
    Exact,
    Normalized,
    ManualOverride,
}

impl MatchConfidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchConfidence::Exact => "exact",
            MatchConfidence::Normalized => "normalized",
            MatchConfidence::ManualOverride => "manual_override",
        }
    }
}

impl std::str::FromStr for MatchConfidence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exact" => Ok(MatchConfidence::Exact),
            "normalized" => Ok(MatchConfidence::Normalized),
            "manual_override" => Ok(MatchConfidence::ManualOverride),
            other => Err(format!("unknown match confidence: {}", other)),
        }
    }
}

/// Where in the source document a line item was found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    /// 1-based line (text layouts) or table row (HTML layouts).
    pub line: usize,
    /// Catalog section header the row appeared under, if the layout has them.
    pub section: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceRange {
    pub min: Decimal,
    pub max: Decimal,
}

/// One detected line item, exactly as the parser found it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawObservation {
    pub source_document_id: String,
    pub period: Period,
    pub raw_label: String,
    pub raw_unit: Option<String>,
    /// Midpoint of `price_range` when the catalog listed a range.
    pub raw_price: Option<Decimal>,
    pub price_range: Option<PriceRange>,
    pub location: SourceLocation,
    /// Set when a token fell outside the price/unit grammar. Such rows are
    /// reported, never priced.
    pub review: Option<String>,
}

impl RawObservation {
    pub fn requires_review(&self) -> bool {
        self.review.is_some()
    }
}

/// Normalized item name and unit used for cross-period matching.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CanonicalLabel {
    pub normalized_name: String,
    pub normalized_unit: UnitKind,
    pub quantity: Option<Decimal>,
    pub category: Category,
    pub essentiality: Essentiality,
    /// Low-confidence normalization: empty name after folding, or a unit
    /// token the rule tables did not know.
    pub ambiguous: bool,
}

impl CanonicalLabel {
    pub fn unit_basis(&self) -> UnitBasis {
        UnitBasis { kind: self.normalized_unit, quantity: self.quantity }
    }

    /// Name, unit and size. Two labels with the same key are the same item.
    pub fn match_key(&self) -> String {
        match self.quantity {
            Some(q) => format!("{}|{}|{}", self.normalized_name, self.normalized_unit.as_str(), q.normalize()),
            None => format!("{}|{}", self.normalized_name, self.normalized_unit.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSighting {
    pub label: CanonicalLabel,
    pub first_seen: Period,
    pub last_seen: Period,
}

/// Persistent record of one physical item across label changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemIdentity {
    pub identity_id: ItemId,
    /// Distinct labels in first-seen order.
    pub canonical_labels_seen: Vec<LabelSighting>,
    pub category: Category,
    pub periods_observed: BTreeSet<Period>,
    pub merged_into: Option<ItemId>,
    /// Created while a below-threshold candidate existed; needs a reviewer.
    pub unreviewed: bool,
}

impl ItemIdentity {
    /// Label from the latest period this identity was observed in. When two
    /// labels share that period the later-added one wins.
    pub fn most_recent_label(&self) -> Option<&CanonicalLabel> {
        self.canonical_labels_seen
            .iter()
            .enumerate()
            .max_by_key(|(i, s)| (s.last_seen, *i))
            .map(|(_, s)| &s.label)
    }

    pub fn coverage(&self) -> usize {
        self.periods_observed.len()
    }

    pub fn is_active(&self) -> bool {
        self.merged_into.is_none()
    }
}

/// One (identity, period) price. Versions above 1 supersede earlier ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricePanelCell {
    pub identity_id: ItemId,
    pub period: Period,
    pub price: Decimal,
    pub unit: UnitBasis,
    pub source_document_id: String,
    pub confidence: MatchConfidence,
    pub version: u32,
    pub note: Option<String>,
}

impl PricePanelCell {
    /// Price per base unit when the size is known, else the package price.
    pub fn unit_price(&self) -> Decimal {
        match self.unit.quantity {
            Some(q) if !q.is_zero() => self.price / q,
            _ => self.price,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexPoint {
    pub period: Period,
    pub commissary_index_value: f64,
    pub reference_index_value: Option<f64>,
    /// Items contributing to the link into this period (base: items priced in it).
    pub basket_size: usize,
    pub link_relative: Option<f64>,
    pub low_confidence: bool,
}
