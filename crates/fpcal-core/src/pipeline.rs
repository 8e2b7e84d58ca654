//! The pure calibration pipeline.
//!
//! Everything in here works on one frozen [`RoundSnapshot`] and performs no
//! I/O. Given the same snapshot, configuration, round id and clock value it
//! produces the same [`CalibrationRound`].
//!
//! ```text
//!  snapshot ─▶ guard ─▶ consistency ─▶ weights ─▶ filter ─▶ consensus
//!                │                                              │
//!                └──▶ KAnonymityError                           ▼
//!                                              result + reputation updates
//! ```

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use fpcal_council::{
    ByzantineFilter, Confidence, ConfidenceCategory, ConsensusCalculator, ConsensusEstimate,
    FilteringSummary, FilterOutcome, WeightedContributor,
};
use fpcal_trust::{
    ConsistencySample, ConsistencyScorer, Contribution, OrgHandle, OrganizationReputation,
    ReputationUpdate, RuleId, StakeOracle, WeightingEngine,
};
use serde::{Deserialize, Serialize};

use crate::config::CalibrationConfig;
use crate::error::KAnonymityError;
use crate::guard::{AdmittedSet, KAnonymityGuard};

/// Everything one round reads, fetched once up front.
#[derive(Debug, Clone)]
pub struct RoundSnapshot {
    /// Rule being calibrated.
    pub rule_id: RuleId,
    /// Contributions for the rule. Entries for other rules are ignored.
    pub contributions: Vec<Contribution>,
    /// Reputation records of the contributors. An absent entry leaves the
    /// contributor without a weight.
    pub reputations: HashMap<OrgHandle, OrganizationReputation>,
    /// Consistency history of the contributors.
    pub histories: HashMap<OrgHandle, Vec<ConsistencySample>>,
}

impl RoundSnapshot {
    /// A snapshot with contributions only.
    pub fn new(rule_id: RuleId, contributions: Vec<Contribution>) -> Self {
        Self {
            rule_id,
            contributions,
            reputations: HashMap::new(),
            histories: HashMap::new(),
        }
    }

    /// Adds reputation records, keyed by their handle.
    pub fn with_reputations<I>(mut self, reputations: I) -> Self
    where
        I: IntoIterator<Item = OrganizationReputation>,
    {
        self.reputations
            .extend(reputations.into_iter().map(|r| (r.org_handle.clone(), r)));
        self
    }

    /// Adds consistency histories.
    pub fn with_histories(mut self, histories: HashMap<OrgHandle, Vec<ConsistencySample>>) -> Self {
        self.histories.extend(histories);
        self
    }
}

/// The consensus released for one rule.
///
/// Only constructible inside this crate from an [`AdmittedSet`], so every
/// value in circulation passed the k-anonymity gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct ConsensusResult {
    /// Rule the consensus is for.
    pub rule_id: RuleId,
    /// Weighted-average FP rate over the trusted contributors.
    pub consensus_fp_rate: f64,
    /// Confidence in `consensus_fp_rate`.
    pub confidence: Confidence,
    /// Contributors that survived filtering.
    pub trusted_count: usize,
    /// Distinct contributors before filtering.
    pub total_count: usize,
    /// Events across the trusted contributors.
    pub total_events: u64,
    /// Clock value the round ran with.
    pub calculated_at: DateTime<Utc>,
    /// What the filter did.
    pub filtering: FilteringSummary,
}

impl ConsensusResult {
    pub(crate) fn from_admitted(
        admitted: &AdmittedSet,
        estimate: ConsensusEstimate,
        outcome: &FilterOutcome,
        filter: &ByzantineFilter,
        calculated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            rule_id: admitted.rule_id().clone(),
            consensus_fp_rate: estimate.fp_rate,
            confidence: estimate.confidence,
            trusted_count: estimate.trusted_count,
            total_count: admitted.len(),
            total_events: estimate.total_events,
            calculated_at,
            filtering: FilteringSummary::from_outcome(outcome, filter.config()),
        }
    }

    /// True if the result carries enough trusted data to feed back into
    /// reputations.
    pub fn is_actionable(&self) -> bool {
        self.trusted_count > 0 && self.confidence.category != ConfidenceCategory::Insufficient
    }
}

/// One successful aggregation: the released result and the reputation
/// write-back it implies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRound {
    /// Identifier used for last-writer-wins ordering in the store.
    pub round_id: u64,
    /// The released consensus.
    pub result: ConsensusResult,
    /// Pending reputation updates, at most one per contributing
    /// organization. Contributions past the lookback horizon produce none.
    /// Empty when the result is not actionable.
    pub updates: Vec<ReputationUpdate>,
}

/// Runs the whole pipeline over a snapshot.
///
/// # Errors
///
/// Returns [`KAnonymityError`] when fewer than
/// `privacy.k_anonymity_threshold` distinct organizations contributed. No
/// other computation happens in that case.
pub fn calibrate(
    snapshot: &RoundSnapshot,
    config: &CalibrationConfig,
    stake: &dyn StakeOracle,
    round_id: u64,
    now: DateTime<Utc>,
) -> Result<CalibrationRound, KAnonymityError> {
    let admitted = KAnonymityGuard::new(config.privacy.k_anonymity_threshold)
        .admit(&snapshot.rule_id, &snapshot.contributions)?;
    Ok(calibrate_admitted(&admitted, snapshot, config, stake, round_id, now))
}

/// The pipeline after the gate has passed.
pub(crate) fn calibrate_admitted(
    admitted: &AdmittedSet,
    snapshot: &RoundSnapshot,
    config: &CalibrationConfig,
    stake: &dyn StakeOracle,
    round_id: u64,
    now: DateTime<Utc>,
) -> CalibrationRound {
    let scorer = ConsistencyScorer::new(config.consistency.clone());
    let weighting = WeightingEngine::new(config.weighting.clone(), config.consistency.clone());
    let filter = ByzantineFilter::new(config.filter.clone());

    let weighted = admitted
        .rollups()
        .map(|(handle, rollup)| {
            let reputation = snapshot.reputations.get(handle);
            WeightedContributor {
                org_handle: handle.clone(),
                fp_rate: rollup.fp_rate,
                weight: reputation.and_then(|rep| {
                    resolve_weight(rep, snapshot.histories.get(handle), &scorer, &weighting, stake, now)
                }),
                stake_pledge: reputation.map(|r| r.stake_pledge).unwrap_or(0.0),
                event_count: rollup.event_count,
            }
        })
        .collect();

    let outcome = filter.apply(weighted);
    let estimate = ConsensusCalculator::new().compute(&outcome.trusted);
    let result = ConsensusResult::from_admitted(admitted, estimate, &outcome, &filter, now);

    let updates = if result.is_actionable() {
        admitted
            .rollups()
            .filter_map(|(handle, rollup)| {
                let sample = ConsistencySample {
                    rule_id: result.rule_id.clone(),
                    contributed: rollup.fp_rate,
                    consensus_at_time: result.consensus_fp_rate,
                    recorded_at: rollup.latest_timestamp,
                };
                let history = snapshot.histories.get(handle).map(Vec::as_slice).unwrap_or(&[]);
                weighting.feedback(snapshot.reputations.get(handle), handle, history, sample, round_id, now)
            })
            .collect()
    } else {
        Vec::new()
    };

    CalibrationRound {
        round_id,
        result,
        updates,
    }
}

/// Weight for one reputation record. A record that fails validation has no
/// usable weight. The consistency score is recomputed from history when any
/// history exists.
fn resolve_weight(
    reputation: &OrganizationReputation,
    history: Option<&Vec<ConsistencySample>>,
    scorer: &ConsistencyScorer,
    weighting: &WeightingEngine,
    stake: &dyn StakeOracle,
    now: DateTime<Utc>,
) -> Option<f64> {
    if reputation.validate().is_err() {
        return None;
    }

    let mut current = reputation.clone();
    if let Some(samples) = history.filter(|h| !h.is_empty()) {
        current.consistency_score = scorer.score(samples, now).score;
    }

    let multiplier = stake.multiplier(&current.org_handle, current.stake_pledge);
    Some(weighting.weight(&current, multiplier))
}
