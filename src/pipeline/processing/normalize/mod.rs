//! Canonicalizes raw item labels and units.
//!
//! Rules run in a fixed order: case/whitespace folding, abbreviation
//! expansion, unit extraction, category assignment, essentiality. The output
//! depends only on the observation and the `RuleSet` passed in.

pub mod rules;

pub use rules::{CategoryRule, RuleSet, UnitRule};

use std::sync::Arc;

use tracing::debug;

use crate::domain::{CanonicalLabel, Category, Essentiality, RawObservation, UnitKind};
use crate::pipeline::processing::parser::grammar::{parse_unit, split_embedded_size};

/// Lowercase, replace punctuation with spaces, collapse whitespace.
pub fn fold(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '.' { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .map(|t| t.trim_matches('.'))
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// True when `phrase` occurs in `text` as whole words.
fn contains_phrase(text: &str, phrase: &str) -> bool {
    if phrase.is_empty() {
        return false;
    }
    format!(" {} ", text).contains(&format!(" {} ", phrase))
}

#[derive(Debug, Clone)]
pub struct Normalizer {
    rules: Arc<RuleSet>,
}

impl Normalizer {
    pub fn new(rules: Arc<RuleSet>) -> Self {
        Self { rules }
    }

    pub fn rules_version(&self) -> &str {
        &self.rules.version
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    fn expand(&self, folded: &str) -> String {
        folded
            .split(' ')
            .filter(|t| !t.is_empty())
            .map(|t| self.rules.synonyms.get(t).map(String::as_str).unwrap_or(t))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Resolve a unit token against the conversion table. Returns the base
    /// kind, the quantity in base units, and whether the token was understood.
    fn extract_unit(&self, raw_unit: Option<&str>) -> (UnitKind, Option<rust_decimal::Decimal>, bool) {
        let Some(raw_unit) = raw_unit.map(str::trim).filter(|u| !u.is_empty()) else {
            return (UnitKind::Each, None, true);
        };
        let Some(token) = parse_unit(raw_unit) else {
            return (UnitKind::Other, None, false);
        };
        let suffix = self.rules.synonyms.get(&token.suffix).cloned().unwrap_or(token.suffix);
        match self.rules.units.get(&suffix) {
            Some(rule) => (rule.kind, token.quantity.map(|q| (q * rule.factor).normalize()), true),
            None => (UnitKind::Other, token.quantity, false),
        }
    }

    fn categorize(&self, name: &str, section: Option<&str>) -> Category {
        let by_name = self
            .rules
            .categories
            .iter()
            .find(|rule| rule.keywords.iter().any(|k| contains_phrase(name, &fold(k))));
        if let Some(rule) = by_name {
            return rule.category;
        }
        let Some(section) = section.map(fold) else {
            return Category::Other;
        };
        self.rules
            .categories
            .iter()
            .find(|rule| rule.sections.iter().any(|s| fold(s) == section))
            .map(|rule| rule.category)
            .unwrap_or(Category::Other)
    }

    fn essentiality(&self, name: &str, section: Option<&str>) -> Essentiality {
        if self.rules.non_essential_keywords.iter().any(|k| contains_phrase(name, &fold(k))) {
            return Essentiality::NonEssential;
        }
        if self.rules.essential_keywords.iter().any(|k| contains_phrase(name, &fold(k))) {
            return Essentiality::Essential;
        }
        match section.map(fold) {
            Some(section) if self.rules.essential_sections.iter().any(|s| fold(s) == section) => {
                Essentiality::Essential
            }
            _ => Essentiality::NonEssential,
        }
    }

    /// Total: every observation yields a label, at worst one marked ambiguous.
    pub fn normalize(&self, observation: &RawObservation) -> CanonicalLabel {
        let (label, unit) = match observation.raw_unit.as_deref() {
            Some(unit) => (observation.raw_label.clone(), Some(unit.to_string())),
            None => match split_embedded_size(&observation.raw_label) {
                Some((rest, size)) => (rest, Some(size)),
                None => (observation.raw_label.clone(), None),
            },
        };

        let name = self.expand(&fold(&label));
        let (normalized_unit, quantity, unit_known) = self.extract_unit(unit.as_deref());
        let section = observation.location.section.as_deref();
        let category = self.categorize(&name, section);
        let essentiality = self.essentiality(&name, section);
        let ambiguous = name.is_empty() || !unit_known;

        if ambiguous {
            debug!(
                "Normalizer: ambiguous label raw='{}' unit={:?} rules={}",
                observation.raw_label, observation.raw_unit, self.rules.version
            );
        }

        CanonicalLabel { normalized_name: name, normalized_unit, quantity, category, essentiality, ambiguous }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SourceLocation;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn normalizer() -> Normalizer {
        Normalizer::new(Arc::new(RuleSet::builtin()))
    }

    fn obs(label: &str, unit: Option<&str>, section: Option<&str>) -> RawObservation {
        RawObservation {
            source_document_id: "doc".to_string(),
            period: "2019".parse().unwrap(),
            raw_label: label.to_string(),
            raw_unit: unit.map(str::to_string),
            raw_price: Some(Decimal::from_str("0.79").unwrap()),
            price_range: None,
            location: SourceLocation { line: 1, section: section.map(str::to_string) },
            review: None,
        }
    }

    #[test]
    fn test_fold() {
        assert_eq!(fold("  SOAP   Bar, (Ivory) "), "soap bar ivory");
        assert_eq!(fold("T-Shirt 2.5"), "t shirt 2.5");
    }

    #[test]
    fn test_same_label_across_periods() {
        let n = normalizer();
        let a = n.normalize(&obs("SOAP BAR", Some("3OZ"), None));
        let b = n.normalize(&obs("Soap  Bar", Some("3 oz"), Some("HYGIENE")));
        assert_eq!(a, b);
        assert_eq!(a.normalized_name, "soap bar");
        assert_eq!(a.normalized_unit, UnitKind::Oz);
        assert_eq!(a.quantity, Some(Decimal::from(3)));
        assert_eq!(a.category, Category::Hygiene);
        assert_eq!(a.essentiality, Essentiality::Essential);
        assert!(!a.ambiguous);
    }

    #[test]
    fn test_embedded_size_without_unit_column() {
        let label = normalizer().normalize(&obs("SOAP BAR 3OZ", None, None));
        assert_eq!(label.normalized_name, "soap bar");
        assert_eq!(label.quantity, Some(Decimal::from(3)));
    }

    #[test]
    fn test_unit_conversion_and_synonyms() {
        let n = normalizer();
        let coffee = n.normalize(&obs("Coffee Instant", Some("1 lb"), None));
        assert_eq!(coffee.normalized_unit, UnitKind::Oz);
        assert_eq!(coffee.quantity, Some(Decimal::from(16)));
        assert_eq!(coffee.category, Category::Food);

        let envelopes = n.normalize(&obs("Envelopes", Some("10 pkg"), None));
        assert_eq!(envelopes.normalized_unit, UnitKind::Pack);
        assert_eq!(envelopes.quantity, Some(Decimal::from(10)));
        assert_eq!(envelopes.category, Category::Stationery);

        let chicken = n.normalize(&obs("CHKN Ramen asst", None, None));
        assert_eq!(chicken.normalized_name, "chicken ramen assorted");
        assert_eq!(chicken.normalized_unit, UnitKind::Each);
    }

    #[test]
    fn test_section_fallback_and_default_category() {
        let n = normalizer();
        let label = n.normalize(&obs("Zebra Cakes", None, Some("SNACKS")));
        assert_eq!(label.category, Category::Food);
        let label = n.normalize(&obs("Mystery Widget", None, Some("MISC")));
        assert_eq!(label.category, Category::Other);
        assert_eq!(label.essentiality, Essentiality::NonEssential);
    }

    #[test]
    fn test_non_essential_keywords_win() {
        let label = normalizer().normalize(&obs("Ice Cream Chocolate", None, Some("ICE CREAM")));
        assert_eq!(label.essentiality, Essentiality::NonEssential);
    }

    #[test]
    fn test_ambiguous_labels() {
        let n = normalizer();
        assert!(n.normalize(&obs("Deodorant", Some("2 furlongs"), None)).ambiguous);
        assert!(n.normalize(&obs("---", None, None)).ambiguous);
    }
}
