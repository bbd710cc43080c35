use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::domain::{CanonicalLabel, ItemId, ItemIdentity, LabelSighting, Period};
use crate::error::MergeError;
use crate::gateway::audit_log::{AuditEvent, AuditLog};

/// Arena of item identities. An `ItemId` is the identity's index and is
/// never reused; identities are never removed, only marked merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdentityRegistry {
    identities: Vec<ItemIdentity>,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn get(&self, id: ItemId) -> Option<&ItemIdentity> {
        self.identities.get(id.0 as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ItemIdentity> + '_ {
        self.identities.iter()
    }

    /// Identities that have not been merged away.
    pub fn active(&self) -> impl Iterator<Item = &ItemIdentity> + '_ {
        self.identities.iter().filter(|i| i.is_active())
    }

    pub fn create(&mut self, label: CanonicalLabel, period: Period, unreviewed: bool) -> ItemId {
        let identity_id = ItemId(self.identities.len() as u32);
        let category = label.category;
        self.identities.push(ItemIdentity {
            identity_id,
            canonical_labels_seen: vec![LabelSighting { label, first_seen: period, last_seen: period }],
            category,
            periods_observed: BTreeSet::from([period]),
            merged_into: None,
            unreviewed,
        });
        identity_id
    }

    /// Extend an identity with a label seen in `period`.
    pub fn observe(&mut self, id: ItemId, label: &CanonicalLabel, period: Period) {
        let Some(identity) = self.identities.get_mut(id.0 as usize) else {
            return;
        };
        match identity.canonical_labels_seen.iter_mut().find(|s| &s.label == label) {
            Some(sighting) => {
                sighting.first_seen = sighting.first_seen.min(period);
                sighting.last_seen = sighting.last_seen.max(period);
            }
            None => identity.canonical_labels_seen.push(LabelSighting {
                label: label.clone(),
                first_seen: period,
                last_seen: period,
            }),
        }
        identity.periods_observed.insert(period);
    }

    /// Follow merge links to the surviving identity.
    pub fn resolve(&self, id: ItemId) -> ItemId {
        let mut current = id;
        // Merge chains are acyclic: `merge` refuses to merge into a merged identity.
        while let Some(next) = self.get(current).and_then(|i| i.merged_into) {
            current = next;
        }
        current
    }

    pub fn mark_reviewed(&mut self, id: ItemId) -> Result<(), MergeError> {
        let identity = self.identities.get_mut(id.0 as usize).ok_or(MergeError::UnknownIdentity(id))?;
        identity.unreviewed = false;
        Ok(())
    }

    /// Mark `from` as merged into `into`. Later matches against `from`'s
    /// labels resolve to `into`; the merge is written to the audit log.
    pub fn merge(
        &mut self,
        from: ItemId,
        into: ItemId,
        reason: &str,
        audit: &mut AuditLog,
        recorded_at: DateTime<Utc>,
    ) -> Result<(), MergeError> {
        if from == into {
            return Err(MergeError::SelfMerge(from));
        }
        let target = self.get(into).ok_or(MergeError::UnknownIdentity(into))?;
        if let Some(survivor) = target.merged_into {
            return Err(MergeError::AlreadyMerged(into, survivor));
        }
        let source = self.get(from).ok_or(MergeError::UnknownIdentity(from))?;
        if let Some(survivor) = source.merged_into {
            return Err(MergeError::AlreadyMerged(from, survivor));
        }

        self.identities[from.0 as usize].merged_into = Some(into);
        audit.record(from, recorded_at, AuditEvent::Merge { into, reason: reason.to_string() });
        tracing::info!("IdentityRegistry: merged {} into {} ({})", from, into, reason);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Category, Essentiality, UnitKind};
    use chrono::TimeZone;

    fn label(name: &str) -> CanonicalLabel {
        CanonicalLabel {
            normalized_name: name.to_string(),
            normalized_unit: UnitKind::Each,
            quantity: None,
            category: Category::Hygiene,
            essentiality: Essentiality::Essential,
            ambiguous: false,
        }
    }

    fn p(s: &str) -> Period {
        s.parse().unwrap()
    }

    #[test]
    fn test_create_and_observe() {
        let mut registry = IdentityRegistry::new();
        let id = registry.create(label("soap bar"), p("2019"), false);
        assert_eq!(id, ItemId(0));

        registry.observe(id, &label("soap bar bath"), p("2020"));
        registry.observe(id, &label("soap bar"), p("2021"));

        let identity = registry.get(id).unwrap();
        assert_eq!(identity.canonical_labels_seen.len(), 2);
        assert_eq!(identity.coverage(), 3);
        assert_eq!(identity.most_recent_label().unwrap().normalized_name, "soap bar");
    }

    #[test]
    fn test_merge_resolves_and_audits() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut registry = IdentityRegistry::new();
        let mut audit = AuditLog::new();
        let a = registry.create(label("soap"), p("2019"), false);
        let b = registry.create(label("soap bar"), p("2020"), true);
        let c = registry.create(label("bar soap"), p("2021"), true);

        registry.merge(b, a, "renamed", &mut audit, at).unwrap();
        assert_eq!(registry.resolve(b), a);
        assert_eq!(registry.active().count(), 2);
        assert_eq!(audit.len(), 1);

        assert_eq!(registry.merge(a, a, "x", &mut audit, at), Err(MergeError::SelfMerge(a)));
        assert_eq!(registry.merge(c, b, "x", &mut audit, at), Err(MergeError::AlreadyMerged(b, a)));
        assert_eq!(
            registry.merge(c, ItemId(99), "x", &mut audit, at),
            Err(MergeError::UnknownIdentity(ItemId(99)))
        );
        assert_eq!(audit.len(), 1);
    }
}
