//! # Persistent Storage Layer
//!
//! A [`CalibrationStore`] backed by Sled, an embedded database. Contributions,
//! reputation records and consistency histories survive restarts, so the
//! feedback loop between rounds is not lost when the process exits.
//!
//! ## Storage Structure
//!
//! | Tree | Key | Value | Purpose |
//! |------|-----|-------|---------|
//! | `contributions` | big-endian rule id length, rule id, big-endian sequence | JSON `Contribution` | Per-rule reports |
//! | `rules` | rule id | empty | Rule listing |
//! | `reputations` | org handle | JSON `OrganizationReputation` | Trust records |
//! | `history` | org handle | JSON `Vec<ConsistencySample>` | Consistency history, pruned to the lookback horizon |
//!
//! ## Concurrency
//!
//! Reputation writes go through a compare-and-swap loop per organization. A
//! write whose round id is not newer than the stored record's `last_round`
//! is dropped, so two rounds racing on the same organization resolve to the
//! newer round no matter which finishes first. History merges use the same
//! loop and drop samples behind the round's cutoff, so a history blob never
//! holds more than the horizon's worth of samples.
//!
//! ## References
//!
//! - Sled documentation: <https://sled.rs/>

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use fpcal_trust::{
    ConsistencySample, Contribution, OrgHandle, OrganizationReputation, ReputationUpdate, RuleId,
};
use tracing::{debug, warn};

use crate::models::{merge_sample, CalibrationStore, Result, SampleMerge, StoreError, WriteSummary};

const CONTRIBUTION_TREE: &str = "contributions";
const RULE_TREE: &str = "rules";
const REPUTATION_TREE: &str = "reputations";
const HISTORY_TREE: &str = "history";

/// Sled-backed calibration store.
///
/// # Example
///
/// ```rust
/// use chrono::Utc;
/// use fpcal_store::{CalibrationStore, SledStore};
/// use fpcal_trust::{Contribution, OrgHandle, RuleId};
///
/// let store = SledStore::temporary().unwrap();
/// let c = Contribution::rate(OrgHandle::new("a1"), RuleId::new("sig-42"), 0.12, 500, Utc::now()).unwrap();
/// store.record_contribution(&c).unwrap();
///
/// assert_eq!(store.list_contributions(&RuleId::new("sig-42")).unwrap().len(), 1);
/// ```
#[derive(Clone)]
pub struct SledStore {
    db: sled::Db,
    contributions: sled::Tree,
    rules: sled::Tree,
    reputations: sled::Tree,
    history: sled::Tree,
}

impl SledStore {
    /// Opens or creates a store at `path`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` if the path is unusable or the database
    /// is corrupted.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_db(sled::open(path)?)
    }

    /// Creates a store that lives only as long as the value.
    pub fn temporary() -> Result<Self> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: sled::Db) -> Result<Self> {
        let contributions = db.open_tree(CONTRIBUTION_TREE)?;
        let rules = db.open_tree(RULE_TREE)?;
        let reputations = db.open_tree(REPUTATION_TREE)?;
        let history = db.open_tree(HISTORY_TREE)?;

        Ok(Self {
            db,
            contributions,
            rules,
            reputations,
            history,
        })
    }

    /// Number of stored reputation records.
    pub fn reputation_count(&self) -> usize {
        self.reputations.len()
    }

    /// One organization's consistency history.
    pub fn history(&self, handle: &OrgHandle) -> Result<Vec<ConsistencySample>> {
        match self.history.get(handle.as_str().as_bytes())? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(Vec::new()),
        }
    }

    /// Flushes pending writes to disk, returning the bytes flushed.
    pub fn flush(&self) -> Result<usize> {
        Ok(self.db.flush()?)
    }

    /// Length-prefixed, so no rule id's prefix covers another rule.
    fn rule_prefix(rule_id: &RuleId) -> Vec<u8> {
        let id = rule_id.as_str().as_bytes();
        let mut prefix = Vec::with_capacity(8 + id.len() + 8);
        prefix.extend_from_slice(&(id.len() as u64).to_be_bytes());
        prefix.extend_from_slice(id);
        prefix
    }

    /// Replaces the reputation record unless a newer round already wrote it.
    /// Returns false when the write was stale.
    fn swap_reputation(&self, round_id: u64, reputation: &OrganizationReputation) -> Result<bool> {
        let key = reputation.org_handle.as_str().as_bytes();
        let mut record = reputation.clone();
        record.last_round = round_id;
        let encoded = serde_json::to_vec(&record)?;

        loop {
            let current = self.reputations.get(key)?;
            if let Some(bytes) = &current {
                let existing: OrganizationReputation = serde_json::from_slice(bytes)?;
                if existing.last_round >= round_id {
                    return Ok(false);
                }
            }

            match self
                .reputations
                .compare_and_swap(key, current, Some(encoded.as_slice()))?
            {
                Ok(()) => return Ok(true),
                Err(_) => {
                    debug!("Reputation record changed concurrently, retrying");
                    continue;
                }
            }
        }
    }

    fn write_sample(
        &self,
        handle: &OrgHandle,
        sample: &ConsistencySample,
        replace: bool,
        cutoff: DateTime<Utc>,
    ) -> Result<SampleMerge> {
        let key = handle.as_str().as_bytes();

        loop {
            let current = self.history.get(key)?;
            let mut samples: Vec<ConsistencySample> = match &current {
                Some(bytes) => serde_json::from_slice(bytes)?,
                None => Vec::new(),
            };
            let merge = merge_sample(&mut samples, sample, replace, cutoff);
            if !merge.changed() {
                return Ok(merge);
            }
            let encoded = serde_json::to_vec(&samples)?;

            if self
                .history
                .compare_and_swap(key, current, Some(encoded.as_slice()))?
                .is_ok()
            {
                return Ok(merge);
            }
        }
    }
}

impl CalibrationStore for SledStore {
    fn list_contributions(&self, rule_id: &RuleId) -> Result<Vec<Contribution>> {
        let mut contributions = Vec::new();
        for entry in self.contributions.scan_prefix(Self::rule_prefix(rule_id)) {
            let (_, value) = entry?;
            contributions.push(serde_json::from_slice(&value)?);
        }
        Ok(contributions)
    }

    fn get_reputations(&self, handles: &[OrgHandle]) -> Result<Vec<OrganizationReputation>> {
        let mut reputations = Vec::with_capacity(handles.len());
        for handle in handles {
            if let Some(bytes) = self.reputations.get(handle.as_str().as_bytes())? {
                reputations.push(serde_json::from_slice(&bytes)?);
            }
        }
        Ok(reputations)
    }

    fn get_consistency_history(
        &self,
        handles: &[OrgHandle],
    ) -> Result<HashMap<OrgHandle, Vec<ConsistencySample>>> {
        let mut histories = HashMap::with_capacity(handles.len());
        for handle in handles {
            if let Some(bytes) = self.history.get(handle.as_str().as_bytes())? {
                histories.insert(handle.clone(), serde_json::from_slice(&bytes)?);
            }
        }
        Ok(histories)
    }

    fn next_round_id(&self) -> Result<u64> {
        // generate_id starts at zero; zero is reserved for "never written by a round".
        Ok(self.db.generate_id()? + 1)
    }

    fn write_reputation_updates(
        &self,
        round_id: u64,
        updates: &[ReputationUpdate],
        history_cutoff: DateTime<Utc>,
    ) -> Result<WriteSummary> {
        let mut summary = WriteSummary::default();

        for update in updates {
            let applied = self.swap_reputation(round_id, &update.reputation)?;
            if applied {
                summary.applied += 1;
            } else {
                summary.stale += 1;
            }
            let merge = self.write_sample(&update.reputation.org_handle, &update.sample, applied, history_cutoff)?;
            summary.record_sample(merge);
        }

        if summary.stale > 0 {
            warn!(
                "Round {}: {} reputation updates superseded by a newer round",
                round_id, summary.stale
            );
        }

        self.db.flush()?;
        Ok(summary)
    }

    fn record_contribution(&self, contribution: &Contribution) -> Result<()> {
        contribution.validate()?;

        let mut key = Self::rule_prefix(&contribution.rule_id);
        key.extend_from_slice(&self.db.generate_id()?.to_be_bytes());
        self.contributions.insert(key, serde_json::to_vec(contribution)?)?;
        self.rules.insert(contribution.rule_id.as_str().as_bytes(), &[] as &[u8])?;

        let handle_key = contribution.org_handle.as_str().as_bytes();
        let fresh = OrganizationReputation::new(contribution.org_handle.clone(), Utc::now());
        // Only fills an empty slot; an existing record is left untouched.
        let _ = self.reputations.compare_and_swap(
            handle_key,
            None as Option<&[u8]>,
            Some(serde_json::to_vec(&fresh)?),
        )?;

        Ok(())
    }

    fn put_reputation(&self, reputation: &OrganizationReputation) -> Result<()> {
        reputation.validate()?;
        self.reputations.insert(
            reputation.org_handle.as_str().as_bytes(),
            serde_json::to_vec(reputation)?,
        )?;
        Ok(())
    }

    fn list_rules(&self) -> Result<Vec<RuleId>> {
        let mut rules = Vec::new();
        for entry in self.rules.iter() {
            let (key, _) = entry?;
            let id = String::from_utf8(key.to_vec())
                .map_err(|_| StoreError::Corrupted("rule id is not UTF-8".to_string()))?;
            rules.push(RuleId::new(id));
        }
        Ok(rules)
    }
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore")
            .field("rules", &self.rules.len())
            .field("reputations", &self.reputations.len())
            .finish()
    }
}
