//! The calibration engine facade.
//!
//! Wires a [`CalibrationStore`] to the pure pipeline: fetch one snapshot,
//! gate it, compute, and hand back a [`CalibrationRound`] that the caller
//! may commit.

use chrono::Utc;
use fpcal_store::{CalibrationStore, WriteSummary};
use fpcal_trust::{NoStake, RuleId, StakeOracle};
use tracing::{debug, info, warn};

use crate::config::CalibrationConfig;
use crate::guard::KAnonymityGuard;
use crate::pipeline::{calibrate_admitted, CalibrationRound, RoundSnapshot};
use crate::Result;

/// Calibration engine over a store.
///
/// # Round Lifecycle
///
/// 1. List the rule's contributions
/// 2. K-anonymity gate (fail closed, nothing else is read on refusal)
/// 3. Allocate a round id
/// 4. Read reputations and consistency history once
/// 5. Compute the consensus and the pending reputation updates
/// 6. [`commit`](Self::commit) writes the updates, keyed by round id
///
/// # Example
///
/// ```rust,ignore
/// let engine = CalibrationEngine::new(CalibrationConfig::default(), SledStore::open(path)?)?;
/// let round = engine.aggregate(&RuleId::new("sigma-4711"))?;
/// engine.commit(&round)?;
/// ```
pub struct CalibrationEngine<S> {
    config: CalibrationConfig,
    guard: KAnonymityGuard,
    store: S,
    stake: Box<dyn StakeOracle>,
}

impl<S: CalibrationStore> CalibrationEngine<S> {
    /// Creates an engine with staking disabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration fails validation.
    pub fn new(config: CalibrationConfig, store: S) -> Result<Self> {
        config.validate()?;

        info!(
            "Calibration engine initialized (k = {}, z = {}, percentile = {})",
            config.privacy.k_anonymity_threshold,
            config.filter.z_score_threshold,
            config.filter.byzantine_filter_percentile
        );

        Ok(Self {
            guard: KAnonymityGuard::new(config.privacy.k_anonymity_threshold),
            config,
            store,
            stake: Box::new(NoStake),
        })
    }

    /// Replaces the stake oracle.
    pub fn with_stake_oracle(mut self, oracle: impl StakeOracle + 'static) -> Self {
        self.stake = Box::new(oracle);
        self
    }

    /// The active configuration.
    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Computes the consensus for one rule without writing anything.
    ///
    /// # Errors
    ///
    /// - [`CalibrationError::KAnonymity`](crate::CalibrationError::KAnonymity)
    ///   when too few organizations contributed
    /// - [`CalibrationError::Store`](crate::CalibrationError::Store) when a
    ///   read fails
    pub fn aggregate(&self, rule_id: &RuleId) -> Result<CalibrationRound> {
        debug!("Aggregating rule {}", rule_id);

        let contributions = self.store.list_contributions(rule_id)?;
        let admitted = match self.guard.admit(rule_id, &contributions) {
            Ok(admitted) => admitted,
            Err(err) => {
                warn!(
                    "Rule {} refused: {} distinct contributors, {} required",
                    rule_id, err.actual_k, err.required_k
                );
                return Err(err.into());
            }
        };

        let round_id = self.store.next_round_id()?;
        let handles = admitted.handles();
        let snapshot = RoundSnapshot::new(rule_id.clone(), contributions)
            .with_reputations(self.store.get_reputations(&handles)?)
            .with_histories(self.store.get_consistency_history(&handles)?);

        let round = calibrate_admitted(&admitted, &snapshot, &self.config, self.stake.as_ref(), round_id, Utc::now());

        let result = &round.result;
        info!(
            "Round {} for rule {}: {}/{} trusted, consensus {:.4}, confidence {} ({:.2})",
            round_id,
            rule_id,
            result.trusted_count,
            result.total_count,
            result.consensus_fp_rate,
            result.confidence.category,
            result.confidence.level
        );

        Ok(round)
    }

    /// Writes a round's reputation updates. History samples that fell
    /// behind the lookback horizon as of the round's clock are pruned.
    pub fn commit(&self, round: &CalibrationRound) -> Result<WriteSummary> {
        if round.updates.is_empty() {
            debug!("Round {} has no updates to commit", round.round_id);
            return Ok(WriteSummary::default());
        }

        let cutoff = self.config.consistency.horizon_start(round.result.calculated_at);
        let summary = self
            .store
            .write_reputation_updates(round.round_id, &round.updates, cutoff)?;
        debug!(
            "Round {} committed: {} applied, {} stale, {} samples pruned",
            round.round_id, summary.applied, summary.stale, summary.samples_pruned
        );
        Ok(summary)
    }

    /// [`aggregate`](Self::aggregate) followed by [`commit`](Self::commit).
    pub fn aggregate_and_commit(&self, rule_id: &RuleId) -> Result<(CalibrationRound, WriteSummary)> {
        let round = self.aggregate(rule_id)?;
        let summary = self.commit(&round)?;
        Ok((round, summary))
    }

    /// Aggregates several rules in parallel, one scoped thread per rule.
    ///
    /// Results come back in the order of `rule_ids`.
    pub fn aggregate_many(&self, rule_ids: &[RuleId]) -> Vec<(RuleId, Result<CalibrationRound>)> {
        std::thread::scope(|scope| {
            let handles: Vec<_> = rule_ids
                .iter()
                .map(|rule_id| scope.spawn(move || self.aggregate(rule_id)))
                .collect();

            rule_ids
                .iter()
                .cloned()
                .zip(handles)
                .map(|(rule_id, handle)| {
                    let result = match handle.join() {
                        Ok(result) => result,
                        Err(panic) => std::panic::resume_unwind(panic),
                    };
                    (rule_id, result)
                })
                .collect()
        })
    }
}

impl<S> std::fmt::Debug for CalibrationEngine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CalibrationEngine")
            .field("config", &self.config)
            .field("guard", &self.guard)
            .finish_non_exhaustive()
    }
}
