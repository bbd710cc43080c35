//! Links canonical labels across periods into persistent item identities.
//!
//! Order of precedence: exact label match, similarity above the acceptance
//! threshold, manual alias, new identity. Near misses are returned to the
//! caller for the audit log; they are never silently accepted.

pub mod alias;
pub mod registry;

pub use alias::{AliasEntry, AliasTable};
pub use registry::IdentityRegistry;

use std::cmp::Ordering;
use std::collections::HashSet;

use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::domain::{CanonicalLabel, ItemId, ItemIdentity, MatchConfidence, Period};
use crate::gateway::audit_log::NearMiss;

const NAME_WEIGHT: f64 = 0.8;
const CATEGORY_WEIGHT: f64 = 0.2;

#[derive(Debug, Clone, PartialEq)]
pub enum MatchDecision {
    ExactLabel,
    Similarity { score: f64 },
    Alias { alias: String, target: String },
    NewIdentity,
    /// Created while near misses existed; flagged for review.
    NewUnreviewed,
}

impl MatchDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchDecision::ExactLabel => "exact_label",
            MatchDecision::Similarity { .. } => "similarity",
            MatchDecision::Alias { .. } => "alias",
            MatchDecision::NewIdentity => "new_identity",
            MatchDecision::NewUnreviewed => "new_identity_unreviewed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
    pub identity_id: ItemId,
    pub confidence: MatchConfidence,
    pub decision: MatchDecision,
    /// Candidates between the consideration floor and the acceptance threshold.
    pub near_misses: Vec<NearMiss>,
}

impl MatchOutcome {
    pub fn escalated(&self) -> bool {
        !self.near_misses.is_empty()
    }
}

/// Jaccard overlap of whitespace tokens.
pub fn token_similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let tokens_a: HashSet<&str> = a.split_whitespace().collect();
    let tokens_b: HashSet<&str> = b.split_whitespace().collect();
    if tokens_a.is_empty() && tokens_b.is_empty() {
        return 1.0;
    }
    let intersection = tokens_a.intersection(&tokens_b).count();
    let union = tokens_a.union(&tokens_b).count();
    intersection as f64 / union as f64
}

#[derive(Debug, Clone)]
pub struct ItemMatcher {
    pub acceptance_threshold: f64,
    pub consideration_floor: f64,
}

impl Default for ItemMatcher {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

impl ItemMatcher {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            acceptance_threshold: config.match_acceptance_threshold,
            consideration_floor: config.match_consideration_floor,
        }
    }

    /// Similarity of a label to an identity's most recent label. Labels whose
    /// units cannot be compared score zero.
    pub fn score(&self, label: &CanonicalLabel, candidate: &CanonicalLabel) -> f64 {
        if !label.unit_basis().is_compatible_with(&candidate.unit_basis()) {
            return 0.0;
        }
        let name = token_similarity(&label.normalized_name, &candidate.normalized_name);
        let category = if label.category == candidate.category { 1.0 } else { 0.0 };
        name * NAME_WEIGHT + category * CATEGORY_WEIGHT
    }

    /// Preferred of two equally good candidates: longer coverage, then the
    /// older identity.
    fn prefer(a: &ItemIdentity, b: &ItemIdentity) -> Ordering {
        a.coverage().cmp(&b.coverage()).then_with(|| b.identity_id.cmp(&a.identity_id))
    }

    /// Merged identities still take part here; a hit resolves to the survivor.
    fn exact(&self, label: &CanonicalLabel, registry: &IdentityRegistry) -> Option<ItemId> {
        let key = label.match_key();
        registry
            .iter()
            .filter(|identity| identity.most_recent_label().is_some_and(|l| l.match_key() == key))
            .filter_map(|identity| registry.get(registry.resolve(identity.identity_id)))
            .max_by(|a, b| Self::prefer(a, b))
            .map(|identity| identity.identity_id)
    }

    /// Candidates scored against every active identity not already priced in
    /// `period`, best first.
    fn scored(&self, label: &CanonicalLabel, period: Period, registry: &IdentityRegistry) -> Vec<(f64, ItemId)> {
        let mut scored: Vec<(f64, &ItemIdentity)> = registry
            .active()
            .filter(|identity| !identity.periods_observed.contains(&period))
            .filter_map(|identity| {
                let recent = identity.most_recent_label()?;
                let score = self.score(label, recent);
                (score >= self.consideration_floor && score > 0.0).then_some((score, identity))
            })
            .collect();
        scored.sort_by(|(sa, a), (sb, b)| {
            sb.partial_cmp(sa).unwrap_or(Ordering::Equal).then_with(|| Self::prefer(b, a))
        });
        scored.into_iter().map(|(s, i)| (s, i.identity_id)).collect()
    }

    fn alias_target(&self, label: &CanonicalLabel, registry: &IdentityRegistry, aliases: &AliasTable) -> Option<(ItemId, String, String)> {
        let entry = aliases.lookup(&label.normalized_name)?;
        let target = registry
            .active()
            .filter(|identity| {
                identity
                    .most_recent_label()
                    .is_some_and(|l| l.normalized_name == entry.target)
            })
            .max_by(|a, b| Self::prefer(a, b));
        match target {
            Some(identity) => Some((identity.identity_id, entry.alias.clone(), entry.target.clone())),
            None => {
                warn!(
                    "ItemMatcher: alias '{}' -> '{}' has no matching identity yet",
                    entry.alias, entry.target
                );
                None
            }
        }
    }

    /// Resolve `label` seen in `period` to an identity, creating one if
    /// nothing matches. The registry is updated with the sighting.
    pub fn match_label(
        &self,
        label: &CanonicalLabel,
        period: Period,
        registry: &mut IdentityRegistry,
        aliases: &AliasTable,
    ) -> MatchOutcome {
        if let Some(id) = self.exact(label, registry) {
            registry.observe(id, label, period);
            return MatchOutcome {
                identity_id: id,
                confidence: MatchConfidence::Exact,
                decision: MatchDecision::ExactLabel,
                near_misses: Vec::new(),
            };
        }

        let mut near_misses = Vec::new();
        if !label.ambiguous {
            let scored = self.scored(label, period, registry);
            if let Some(&(score, id)) = scored.first() {
                if score >= self.acceptance_threshold {
                    debug!("ItemMatcher: '{}' -> {} score={:.3}", label.normalized_name, id, score);
                    registry.observe(id, label, period);
                    return MatchOutcome {
                        identity_id: id,
                        confidence: MatchConfidence::Normalized,
                        decision: MatchDecision::Similarity { score },
                        near_misses: Vec::new(),
                    };
                }
            }
            near_misses = scored.into_iter().map(|(score, identity_id)| NearMiss { identity_id, score }).collect();
            if !near_misses.is_empty() {
                info!(
                    "ItemMatcher: '{}' in {} has {} below-threshold candidates (best {:.3})",
                    label.normalized_name,
                    period,
                    near_misses.len(),
                    near_misses[0].score
                );
            }
        }

        if let Some((id, alias, target)) = self.alias_target(label, registry, aliases) {
            registry.observe(id, label, period);
            return MatchOutcome {
                identity_id: id,
                confidence: MatchConfidence::ManualOverride,
                decision: MatchDecision::Alias { alias, target },
                near_misses,
            };
        }

        let unreviewed = !near_misses.is_empty() || label.ambiguous;
        let id = registry.create(label.clone(), period, unreviewed);
        MatchOutcome {
            identity_id: id,
            confidence: MatchConfidence::Exact,
            decision: if unreviewed { MatchDecision::NewUnreviewed } else { MatchDecision::NewIdentity },
            near_misses,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Category, Essentiality, UnitKind};
    use rust_decimal::Decimal;

    fn label(name: &str, unit: UnitKind, qty: Option<i64>, category: Category) -> CanonicalLabel {
        CanonicalLabel {
            normalized_name: name.to_string(),
            normalized_unit: unit,
            quantity: qty.map(Decimal::from),
            category,
            essentiality: Essentiality::Essential,
            ambiguous: false,
        }
    }

    fn soap(name: &str, qty: i64) -> CanonicalLabel {
        label(name, UnitKind::Oz, Some(qty), Category::Hygiene)
    }

    fn p(s: &str) -> Period {
        s.parse().unwrap()
    }

    #[test]
    fn test_token_similarity() {
        assert_eq!(token_similarity("soap bar", "soap bar"), 1.0);
        assert!((token_similarity("soap bar", "soap bar ivory") - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(token_similarity("soap", "ramen"), 0.0);
    }

    #[test]
    fn test_exact_match_reuses_identity() {
        let matcher = ItemMatcher::default();
        let mut registry = IdentityRegistry::new();
        let aliases = AliasTable::default();

        let first = matcher.match_label(&soap("soap bar", 3), p("2019"), &mut registry, &aliases);
        assert_eq!(first.decision, MatchDecision::NewIdentity);
        let second = matcher.match_label(&soap("soap bar", 3), p("2020"), &mut registry, &aliases);
        assert_eq!(second.identity_id, first.identity_id);
        assert_eq!(second.confidence, MatchConfidence::Exact);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_repackaged_item_matches_by_similarity() {
        let matcher = ItemMatcher::default();
        let mut registry = IdentityRegistry::new();
        let aliases = AliasTable::default();

        let first = matcher.match_label(&soap("soap bar", 3), p("2019"), &mut registry, &aliases);
        let second = matcher.match_label(&soap("soap bar", 4), p("2020"), &mut registry, &aliases);
        assert_eq!(second.identity_id, first.identity_id);
        assert_eq!(second.confidence, MatchConfidence::Normalized);
    }

    #[test]
    fn test_incompatible_units_never_match() {
        let matcher = ItemMatcher::default();
        let mut registry = IdentityRegistry::new();
        let aliases = AliasTable::default();

        matcher.match_label(&soap("soap bar", 3), p("2019"), &mut registry, &aliases);
        let other = label("soap bar", UnitKind::Pack, Some(3), Category::Hygiene);
        let outcome = matcher.match_label(&other, p("2020"), &mut registry, &aliases);
        assert_eq!(outcome.decision, MatchDecision::NewIdentity);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_near_miss_escalates_then_alias_resolves() {
        let matcher = ItemMatcher::default();
        let mut registry = IdentityRegistry::new();
        let empty = AliasTable::default();

        let soap_id = matcher.match_label(&soap("soap bar", 3), p("2019"), &mut registry, &empty).identity_id;

        // 1/4 token overlap: 0.8/4 + 0.2 = 0.4, between floor and threshold.
        let renamed = soap("soap ivory bath", 3);
        let outcome = matcher.match_label(&renamed, p("2020"), &mut registry, &empty);
        assert_eq!(outcome.decision, MatchDecision::NewUnreviewed);
        assert!(outcome.escalated());
        assert_eq!(outcome.near_misses[0].identity_id, soap_id);
        assert!(registry.get(outcome.identity_id).unwrap().unreviewed);

        let mut registry = IdentityRegistry::new();
        let aliases = AliasTable::new(vec![AliasEntry {
            alias: "soap ivory bath".to_string(),
            target: "soap bar".to_string(),
            note: None,
        }]);
        let soap_id = matcher.match_label(&soap("soap bar", 3), p("2019"), &mut registry, &aliases).identity_id;
        let outcome = matcher.match_label(&renamed, p("2020"), &mut registry, &aliases);
        assert_eq!(outcome.identity_id, soap_id);
        assert_eq!(outcome.confidence, MatchConfidence::ManualOverride);
        assert!(outcome.escalated());
    }

    #[test]
    fn test_tie_prefers_longer_coverage() {
        let matcher = ItemMatcher::default();
        let mut registry = IdentityRegistry::new();
        let aliases = AliasTable::default();

        let short = registry.create(soap("soap bar ivory", 3), p("2019"), false);
        let long = registry.create(soap("soap bar dial", 3), p("2018"), false);
        registry.observe(long, &soap("soap bar dial", 3), p("2019"));

        // "soap bar" scores 2/3 name overlap against both.
        let matcher = ItemMatcher { acceptance_threshold: 0.7, ..matcher };
        let outcome = matcher.match_label(&soap("soap bar", 3), p("2020"), &mut registry, &aliases);
        assert_eq!(outcome.identity_id, long);
        assert_ne!(outcome.identity_id, short);
    }

    #[test]
    fn test_fuzzy_match_skips_identity_already_priced_in_period() {
        let matcher = ItemMatcher::default();
        let mut registry = IdentityRegistry::new();
        let aliases = AliasTable::default();

        let a = matcher.match_label(&soap("soap bar", 3), p("2019"), &mut registry, &aliases);
        let b = matcher.match_label(&soap("soap bar", 5), p("2019"), &mut registry, &aliases);
        assert_ne!(a.identity_id, b.identity_id);
    }

    #[test]
    fn test_merged_identity_resolves_to_survivor() {
        use crate::gateway::audit_log::AuditLog;
        use chrono::Utc;

        let matcher = ItemMatcher::default();
        let mut registry = IdentityRegistry::new();
        let aliases = AliasTable::default();
        let mut audit = AuditLog::new();

        let a = matcher.match_label(&soap("soap", 3), p("2018"), &mut registry, &aliases).identity_id;
        let b = matcher.match_label(&soap("ramen", 3), p("2019"), &mut registry, &aliases).identity_id;
        registry.merge(b, a, "same item", &mut audit, Utc::now()).unwrap();

        let outcome = matcher.match_label(&soap("ramen", 3), p("2020"), &mut registry, &aliases);
        assert_eq!(outcome.identity_id, a);
        assert_eq!(registry.len(), 2);
    }
}
