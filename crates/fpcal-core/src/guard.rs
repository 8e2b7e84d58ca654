//! K-anonymity gate.
//!
//! Counts distinct contributing organizations before anything else is
//! computed. Below the threshold the round stops with a
//! [`KAnonymityError`]; there is no partial or degraded result.
//!
//! Passing the gate produces an [`AdmittedSet`]. It can only be created
//! here, and a `ConsensusResult` can only be built from one, so the type
//! system guarantees that every released aggregate went through the gate.

use std::collections::BTreeMap;

use fpcal_trust::{Contribution, OrgHandle, RuleId, RuleRollup};

use crate::error::KAnonymityError;

/// The privacy gate.
#[derive(Debug, Clone, Copy)]
pub struct KAnonymityGuard {
    k: usize,
}

impl KAnonymityGuard {
    /// Creates a gate requiring `k` distinct organizations.
    pub fn new(k: usize) -> Self {
        Self { k }
    }

    /// Configured threshold.
    pub fn threshold(&self) -> usize {
        self.k
    }

    /// Admits a rule's contributions if enough distinct organizations
    /// reported it. Contributions for other rules are ignored.
    pub fn admit(&self, rule_id: &RuleId, contributions: &[Contribution]) -> Result<AdmittedSet, KAnonymityError> {
        let mut by_org: BTreeMap<OrgHandle, Vec<&Contribution>> = BTreeMap::new();
        for c in contributions.iter().filter(|c| &c.rule_id == rule_id) {
            by_org.entry(c.org_handle.clone()).or_default().push(c);
        }

        if by_org.len() < self.k {
            return Err(KAnonymityError {
                required_k: self.k,
                actual_k: by_org.len(),
            });
        }

        let rollups = by_org
            .into_iter()
            .filter_map(|(handle, cs)| RuleRollup::from_contributions(cs).map(|r| (handle, r)))
            .collect();

        Ok(AdmittedSet {
            rule_id: rule_id.clone(),
            rollups,
        })
    }
}

/// Contributions for one rule that passed the gate, rolled up per
/// organization and ordered by handle.
#[derive(Debug, Clone)]
pub struct AdmittedSet {
    rule_id: RuleId,
    rollups: BTreeMap<OrgHandle, RuleRollup>,
}

impl AdmittedSet {
    /// Rule this set belongs to.
    pub fn rule_id(&self) -> &RuleId {
        &self.rule_id
    }

    /// Distinct contributing organizations.
    pub fn len(&self) -> usize {
        self.rollups.len()
    }

    /// True if no organization contributed. Only possible with `k = 0`.
    pub fn is_empty(&self) -> bool {
        self.rollups.is_empty()
    }

    /// Contributing handles in sorted order.
    pub fn handles(&self) -> Vec<OrgHandle> {
        self.rollups.keys().cloned().collect()
    }

    /// Per-organization rollups in handle order.
    pub fn rollups(&self) -> impl Iterator<Item = (&OrgHandle, &RuleRollup)> {
        self.rollups.iter()
    }
}
