//! In-memory store for tests and embedding.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use fpcal_trust::{
    ConsistencySample, Contribution, OrgHandle, OrganizationReputation, ReputationUpdate, RuleId,
};
use tracing::warn;

use crate::models::{merge_sample, CalibrationStore, Result, StoreError, WriteSummary};

#[derive(Debug, Default)]
struct MemoryState {
    contributions: BTreeMap<RuleId, Vec<Contribution>>,
    reputations: HashMap<OrgHandle, OrganizationReputation>,
    history: HashMap<OrgHandle, Vec<ConsistencySample>>,
    last_round: u64,
}

/// A [`CalibrationStore`] held entirely in memory behind one lock.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored reputation records.
    pub fn reputation_count(&self) -> Result<usize> {
        Ok(self.read()?.reputations.len())
    }

    /// One organization's consistency history.
    pub fn history(&self, handle: &OrgHandle) -> Result<Vec<ConsistencySample>> {
        Ok(self.read()?.history.get(handle).cloned().unwrap_or_default())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryState>> {
        self.state.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryState>> {
        self.state.write().map_err(|_| StoreError::Poisoned)
    }
}

impl CalibrationStore for MemoryStore {
    fn list_contributions(&self, rule_id: &RuleId) -> Result<Vec<Contribution>> {
        Ok(self.read()?.contributions.get(rule_id).cloned().unwrap_or_default())
    }

    fn get_reputations(&self, handles: &[OrgHandle]) -> Result<Vec<OrganizationReputation>> {
        let state = self.read()?;
        Ok(handles
            .iter()
            .filter_map(|h| state.reputations.get(h).cloned())
            .collect())
    }

    fn get_consistency_history(
        &self,
        handles: &[OrgHandle],
    ) -> Result<HashMap<OrgHandle, Vec<ConsistencySample>>> {
        let state = self.read()?;
        Ok(handles
            .iter()
            .filter_map(|h| state.history.get(h).map(|samples| (h.clone(), samples.clone())))
            .collect())
    }

    fn next_round_id(&self) -> Result<u64> {
        let mut state = self.write()?;
        state.last_round += 1;
        Ok(state.last_round)
    }

    fn write_reputation_updates(
        &self,
        round_id: u64,
        updates: &[ReputationUpdate],
        history_cutoff: DateTime<Utc>,
    ) -> Result<WriteSummary> {
        let mut state = self.write()?;
        let mut summary = WriteSummary::default();

        for update in updates {
            let handle = update.reputation.org_handle.clone();

            let is_stale = state
                .reputations
                .get(&handle)
                .map(|existing| existing.last_round >= round_id)
                .unwrap_or(false);

            if is_stale {
                summary.stale += 1;
            } else {
                let mut reputation = update.reputation.clone();
                reputation.last_round = round_id;
                state.reputations.insert(handle.clone(), reputation);
                summary.applied += 1;
            }

            let history = state.history.entry(handle).or_default();
            summary.record_sample(merge_sample(history, &update.sample, !is_stale, history_cutoff));
        }

        if summary.stale > 0 {
            warn!(
                "Round {}: {} reputation updates superseded by a newer round",
                round_id, summary.stale
            );
        }

        Ok(summary)
    }

    fn record_contribution(&self, contribution: &Contribution) -> Result<()> {
        contribution.validate()?;
        let mut state = self.write()?;

        state
            .contributions
            .entry(contribution.rule_id.clone())
            .or_default()
            .push(contribution.clone());

        state
            .reputations
            .entry(contribution.org_handle.clone())
            .or_insert_with(|| OrganizationReputation::new(contribution.org_handle.clone(), Utc::now()));

        Ok(())
    }

    fn put_reputation(&self, reputation: &OrganizationReputation) -> Result<()> {
        reputation.validate()?;
        self.write()?
            .reputations
            .insert(reputation.org_handle.clone(), reputation.clone());
        Ok(())
    }

    fn list_rules(&self) -> Result<Vec<RuleId>> {
        Ok(self.read()?.contributions.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use fpcal_trust::DEFAULT_BASE_REPUTATION;

    fn contribution(org: &str, rule: &str, rate: f64) -> Contribution {
        Contribution::rate(OrgHandle::new(org), RuleId::new(rule), rate, 10, Utc::now()).unwrap()
    }

    fn update(org: &str, consistency: f64, recorded_at: DateTime<Utc>) -> ReputationUpdate {
        ReputationUpdate {
            reputation: OrganizationReputation::new(OrgHandle::new(org), Utc::now()).with_consistency(consistency),
            sample: ConsistencySample {
                rule_id: RuleId::new("r"),
                contributed: 0.1,
                consensus_at_time: consistency,
                recorded_at,
            },
        }
    }

    fn horizon(now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::days(180)
    }

    #[test]
    fn test_record_creates_cold_start_reputation() {
        let store = MemoryStore::new();
        store.record_contribution(&contribution("a", "r1", 0.1)).unwrap();
        store.record_contribution(&contribution("a", "r2", 0.2)).unwrap();

        let reps = store.get_reputations(&[OrgHandle::new("a")]).unwrap();
        assert_eq!(reps.len(), 1);
        assert_eq!(reps[0].base_reputation, DEFAULT_BASE_REPUTATION);
        assert_eq!(store.list_rules().unwrap(), vec![RuleId::new("r1"), RuleId::new("r2")]);
    }

    #[test]
    fn test_record_does_not_reset_existing_reputation() {
        let store = MemoryStore::new();
        let rep = OrganizationReputation::new(OrgHandle::new("a"), Utc::now()).with_base_reputation(0.9);
        store.put_reputation(&rep).unwrap();
        store.record_contribution(&contribution("a", "r1", 0.1)).unwrap();

        let reps = store.get_reputations(&[OrgHandle::new("a")]).unwrap();
        assert_eq!(reps[0].base_reputation, 0.9);
    }

    #[test]
    fn test_invalid_contribution_rejected() {
        let store = MemoryStore::new();
        let mut c = contribution("a", "r1", 0.1);
        c.signal = fpcal_trust::Signal::FpRate(2.0);
        assert!(matches!(store.record_contribution(&c), Err(StoreError::Invalid(_))));
    }

    #[test]
    fn test_missing_handles_omitted() {
        let store = MemoryStore::new();
        let reps = store.get_reputations(&[OrgHandle::new("nobody")]).unwrap();
        assert!(reps.is_empty());
        assert!(store.get_consistency_history(&[OrgHandle::new("nobody")]).unwrap().is_empty());
    }

    #[test]
    fn test_round_ids_monotonic() {
        let store = MemoryStore::new();
        let a = store.next_round_id().unwrap();
        let b = store.next_round_id().unwrap();
        assert!(b > a);
        assert!(a > 0);
    }

    #[test]
    fn test_stale_round_does_not_overwrite() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let earlier = now - Duration::hours(1);

        let summary = store.write_reputation_updates(5, &[update("a", 0.9, now)], horizon(now)).unwrap();
        assert_eq!(summary.applied, 1);

        // A different contribution set is still recorded by a stale round.
        let summary = store.write_reputation_updates(3, &[update("a", 0.1, earlier)], horizon(now)).unwrap();
        assert_eq!(summary.stale, 1);
        assert_eq!(summary.samples_appended, 1);

        // The same contribution set is not re-scored by a stale round.
        let summary = store.write_reputation_updates(4, &[update("a", 0.2, now)], horizon(now)).unwrap();
        assert_eq!(summary.stale, 1);
        assert_eq!(summary.samples_replaced, 0);

        let reps = store.get_reputations(&[OrgHandle::new("a")]).unwrap();
        assert_eq!(reps[0].consistency_score, 0.9);
        assert_eq!(reps[0].last_round, 5);
        let history = store.history(&OrgHandle::new("a")).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].consensus_at_time, 0.9);
    }

    #[test]
    fn test_rescored_contribution_replaces_sample() {
        let store = MemoryStore::new();
        let now = Utc::now();

        store.write_reputation_updates(1, &[update("a", 0.4, now)], horizon(now)).unwrap();
        let summary = store.write_reputation_updates(2, &[update("a", 0.6, now)], horizon(now)).unwrap();
        assert_eq!(summary.samples_replaced, 1);
        assert_eq!(summary.samples_appended, 0);

        let history = store.history(&OrgHandle::new("a")).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].consensus_at_time, 0.6);
    }

    #[test]
    fn test_expired_samples_dropped_on_write() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let old = now - Duration::days(300);

        // Written back when it was still inside the horizon.
        store.write_reputation_updates(1, &[update("a", 0.5, old)], horizon(old)).unwrap();
        assert_eq!(store.history(&OrgHandle::new("a")).unwrap().len(), 1);

        let summary = store.write_reputation_updates(2, &[update("a", 0.5, now)], horizon(now)).unwrap();
        assert_eq!(summary.samples_pruned, 1);
        let history = store.history(&OrgHandle::new("a")).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].recorded_at, now);
    }
}
