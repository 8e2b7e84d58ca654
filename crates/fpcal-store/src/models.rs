//! The storage boundary consumed by the calibration engine.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use fpcal_trust::{
    ConsistencySample, Contribution, OrgHandle, OrganizationReputation, ReputationUpdate, RuleId,
    TrustError,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by a store.
///
/// These are I/O failures. The engine propagates them unchanged and never
/// treats a failed read as an empty result.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The embedded database failed.
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    /// A record could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A record failed validation before being written.
    #[error("Invalid record: {0}")]
    Invalid(#[from] TrustError),

    /// A stored key is not valid UTF-8 or has an unexpected layout.
    #[error("Corrupted record: {0}")]
    Corrupted(String),

    /// An in-process lock was poisoned by a panicking writer.
    #[error("Store lock poisoned")]
    Poisoned,

    /// The backing service is unavailable.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// What happened to a batch of reputation updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WriteSummary {
    /// Reputation records replaced.
    pub applied: usize,
    /// Reputation records left alone because a newer round already wrote them.
    pub stale: usize,
    /// History samples for contribution sets not seen before.
    pub samples_appended: usize,
    /// History samples that re-scored an already recorded contribution set.
    pub samples_replaced: usize,
    /// History samples dropped for falling behind the lookback horizon.
    pub samples_pruned: usize,
}

impl WriteSummary {
    pub(crate) fn record_sample(&mut self, merge: SampleMerge) {
        match merge.write {
            SampleWrite::Appended => self.samples_appended += 1,
            SampleWrite::Replaced => self.samples_replaced += 1,
            SampleWrite::Kept => {}
        }
        self.samples_pruned += merge.pruned;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SampleWrite {
    Appended,
    Replaced,
    Kept,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SampleMerge {
    pub(crate) write: SampleWrite,
    pub(crate) pruned: usize,
}

impl SampleMerge {
    pub(crate) fn changed(&self) -> bool {
        self.write != SampleWrite::Kept || self.pruned > 0
    }
}

/// Merges one round's sample into an organization's history.
///
/// Samples recorded before `cutoff` are dropped, including the incoming
/// one. A sample for an already recorded contribution set replaces it only
/// when `replace` is set (the round's reputation write was not stale).
pub(crate) fn merge_sample(
    history: &mut Vec<ConsistencySample>,
    sample: &ConsistencySample,
    replace: bool,
    cutoff: DateTime<Utc>,
) -> SampleMerge {
    let before = history.len();
    history.retain(|s| s.recorded_at >= cutoff);
    let pruned = before - history.len();

    let write = if sample.recorded_at < cutoff {
        SampleWrite::Kept
    } else if let Some(existing) = history.iter_mut().find(|s| s.same_contribution(sample)) {
        if replace {
            *existing = sample.clone();
            SampleWrite::Replaced
        } else {
            SampleWrite::Kept
        }
    } else {
        history.push(sample.clone());
        SampleWrite::Appended
    };

    SampleMerge { write, pruned }
}

/// Read snapshot and post-round write-back for the calibration engine,
/// plus the ingestion path that feeds it.
///
/// # Consistency
///
/// Implementations must serialize writes per organization: an update whose
/// round id is not newer than the stored record's `last_round` must leave
/// the record untouched (last writer wins by round, not by wall clock).
///
/// History holds at most one sample per rule and contribution time. A new
/// contribution set is appended even by a stale round; an existing one is
/// replaced only by a round whose reputation write applied. Samples older
/// than the cutoff are pruned on every write.
pub trait CalibrationStore: Send + Sync {
    /// Every contribution recorded for `rule_id`.
    fn list_contributions(&self, rule_id: &RuleId) -> Result<Vec<Contribution>>;

    /// Reputation records for the given handles. Missing handles are omitted.
    fn get_reputations(&self, handles: &[OrgHandle]) -> Result<Vec<OrganizationReputation>>;

    /// Consistency history for the given handles. Missing handles are omitted.
    fn get_consistency_history(
        &self,
        handles: &[OrgHandle],
    ) -> Result<HashMap<OrgHandle, Vec<ConsistencySample>>>;

    /// A fresh round identifier, strictly greater than any issued before.
    fn next_round_id(&self) -> Result<u64>;

    /// Applies a round's write-back. History samples recorded before
    /// `history_cutoff` are dropped for every organization written.
    fn write_reputation_updates(
        &self,
        round_id: u64,
        updates: &[ReputationUpdate],
        history_cutoff: DateTime<Utc>,
    ) -> Result<WriteSummary>;

    /// Records a contribution and lazily creates the reporter's reputation
    /// record with cold-start defaults.
    fn record_contribution(&self, contribution: &Contribution) -> Result<()>;

    /// Inserts or replaces a reputation record outside of any round.
    fn put_reputation(&self, reputation: &OrganizationReputation) -> Result<()>;

    /// Every rule that has at least one contribution, in sorted order.
    fn list_rules(&self) -> Result<Vec<RuleId>>;
}
