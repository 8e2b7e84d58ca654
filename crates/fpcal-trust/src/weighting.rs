//! Contribution weighting and the post-round reputation feedback step.
//!
//! ```text
//! bonus  = (consistency_score - 0.5) * 2 * max_consistency_bonus
//! weight = base_reputation * (1 + stake_multiplier) * (1 + bonus)
//! ```
//!
//! A perfect consistency score adds `max_consistency_bonus` (default +20%),
//! the neutral score adds nothing, and a score of zero subtracts the same
//! amount.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::consistency::{ConsistencyConfig, ConsistencyScorer};
use crate::models::{ConsistencySample, OrgHandle, OrganizationReputation, ReputationUpdate};

/// Configuration for the weighting engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightingConfig {
    /// Cap on the consistency bonus (and penalty).
    pub max_consistency_bonus: f64,
}

impl Default for WeightingConfig {
    fn default() -> Self {
        Self {
            max_consistency_bonus: 0.20,
        }
    }
}

/// Derives a weight multiplier from pledged stake.
///
/// Stake economics live outside the calibration engine; this trait is the
/// seam where a deployment plugs them in.
pub trait StakeOracle: Send + Sync {
    /// Multiplier added to 1.0 in the weight formula. Must be ≥ 0.
    fn multiplier(&self, org: &OrgHandle, stake_pledge: f64) -> f64;
}

/// Staking disabled: every organization gets a zero multiplier.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoStake;

impl StakeOracle for NoStake {
    fn multiplier(&self, _org: &OrgHandle, _stake_pledge: f64) -> f64 {
        0.0
    }
}

/// Multiplier proportional to stake, capped.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearStake {
    /// Multiplier gained per unit of stake.
    pub per_unit: f64,
    /// Maximum multiplier.
    pub cap: f64,
}

impl StakeOracle for LinearStake {
    fn multiplier(&self, _org: &OrgHandle, stake_pledge: f64) -> f64 {
        if !stake_pledge.is_finite() || stake_pledge <= 0.0 {
            return 0.0;
        }
        (stake_pledge * self.per_unit).clamp(0.0, self.cap.max(0.0))
    }
}

/// Turns reputation records into contribution weights and produces the
/// post-round reputation updates.
#[derive(Debug, Clone, Default)]
pub struct WeightingEngine {
    config: WeightingConfig,
    scorer: ConsistencyScorer,
}

impl WeightingEngine {
    /// Creates an engine. The consistency configuration drives the feedback step.
    pub fn new(config: WeightingConfig, consistency: ConsistencyConfig) -> Self {
        Self {
            config,
            scorer: ConsistencyScorer::new(consistency),
        }
    }

    /// Returns the weighting configuration.
    pub fn config(&self) -> &WeightingConfig {
        &self.config
    }

    /// Bonus (or penalty) derived from a consistency score.
    pub fn consistency_bonus(&self, consistency_score: f64) -> f64 {
        let score = consistency_score.clamp(0.0, 1.0);
        (score - 0.5) * 2.0 * self.config.max_consistency_bonus
    }

    /// Contribution weight for one organization. Never negative.
    pub fn weight(&self, reputation: &OrganizationReputation, stake_multiplier: f64) -> f64 {
        let stake = if stake_multiplier.is_finite() {
            stake_multiplier.max(0.0)
        } else {
            0.0
        };
        let bonus = self.consistency_bonus(reputation.consistency_score);
        let weight = reputation.base_reputation.max(0.0) * (1.0 + stake) * (1.0 + bonus);

        if weight.is_finite() {
            weight.max(0.0)
        } else {
            0.0
        }
    }

    /// Builds the write-back for one organization after a round.
    ///
    /// `history` must come from the same snapshot the round was computed
    /// from; the record being produced is never read back here.
    ///
    /// A sample for a contribution set already in `history` replaces the old
    /// sample and does not raise `contribution_count`. A sample past the
    /// lookback horizon yields no update.
    pub fn feedback(
        &self,
        snapshot: Option<&OrganizationReputation>,
        org: &OrgHandle,
        history: &[ConsistencySample],
        sample: ConsistencySample,
        round_id: u64,
        now: DateTime<Utc>,
    ) -> Option<ReputationUpdate> {
        if !self.scorer.is_within_horizon(sample.recorded_at, now) {
            return None;
        }

        let mut reputation = snapshot
            .cloned()
            .unwrap_or_else(|| OrganizationReputation::new(org.clone(), now));

        let mut samples: Vec<ConsistencySample> = history
            .iter()
            .filter(|s| !s.same_contribution(&sample))
            .cloned()
            .collect();
        let already_recorded = samples.len() < history.len();
        samples.push(sample.clone());

        let report = self.scorer.score(&samples, now);

        reputation.consistency_score = report.score;
        if !already_recorded {
            reputation.contribution_count = reputation.contribution_count.saturating_add(1);
        }
        reputation.last_updated = now;
        reputation.last_round = round_id;

        Some(ReputationUpdate { reputation, sample })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RuleId;

    fn rep(base: f64, consistency: f64) -> OrganizationReputation {
        OrganizationReputation::new(OrgHandle::new("org"), Utc::now())
            .with_base_reputation(base)
            .with_consistency(consistency)
    }

    #[test]
    fn test_consistency_bonus_range() {
        let engine = WeightingEngine::default();
        assert!((engine.consistency_bonus(1.0) - 0.2).abs() < 1e-12);
        assert_eq!(engine.consistency_bonus(0.5), 0.0);
        assert!((engine.consistency_bonus(0.0) + 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_weight_formula() {
        let engine = WeightingEngine::default();
        // 0.8 * (1 + 0.5) * (1 + 0.2) = 1.44
        let w = engine.weight(&rep(0.8, 1.0), 0.5);
        assert!((w - 1.44).abs() < 1e-12);
    }

    #[test]
    fn test_neutral_weight_equals_base() {
        let engine = WeightingEngine::default();
        let w = engine.weight(&rep(0.6, 0.5), 0.0);
        assert!((w - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_weight_never_negative() {
        let engine = WeightingEngine::new(
            WeightingConfig {
                max_consistency_bonus: 1.0,
            },
            ConsistencyConfig::default(),
        );
        assert_eq!(engine.weight(&rep(0.5, 0.0), 0.0), 0.0);
        assert_eq!(engine.weight(&rep(0.5, 0.5), -3.0), 0.5);
        assert_eq!(engine.weight(&rep(0.5, 0.5), f64::NAN), 0.5);
    }

    #[test]
    fn test_linear_stake_capped() {
        let oracle = LinearStake {
            per_unit: 0.01,
            cap: 0.5,
        };
        let org = OrgHandle::new("org");
        assert_eq!(oracle.multiplier(&org, 0.0), 0.0);
        assert!((oracle.multiplier(&org, 10.0) - 0.1).abs() < 1e-12);
        assert_eq!(oracle.multiplier(&org, 1_000.0), 0.5);
        assert_eq!(NoStake.multiplier(&org, 1_000.0), 0.0);
    }

    #[test]
    fn test_feedback_creates_cold_start_record() {
        let engine = WeightingEngine::default();
        let now = Utc::now();
        let org = OrgHandle::new("new-org");
        let sample = ConsistencySample {
            rule_id: RuleId::new("r"),
            contributed: 0.1,
            consensus_at_time: 0.1,
            recorded_at: now,
        };

        let update = engine.feedback(None, &org, &[], sample, 7, now).unwrap();
        assert_eq!(update.reputation.org_handle, org);
        assert_eq!(update.reputation.contribution_count, 1);
        assert_eq!(update.reputation.last_round, 7);
        // One sample is below the cold-start threshold.
        assert_eq!(update.reputation.consistency_score, 0.5);
    }

    #[test]
    fn test_feedback_uses_history_and_new_sample() {
        let engine = WeightingEngine::default();
        let now = Utc::now();
        let org = OrgHandle::new("org");
        let history: Vec<_> = (0..2)
            .map(|_| ConsistencySample {
                rule_id: RuleId::new("r"),
                contributed: 0.2,
                consensus_at_time: 0.2,
                recorded_at: now,
            })
            .collect();
        let sample = ConsistencySample {
            rule_id: RuleId::new("r"),
            contributed: 0.5,
            consensus_at_time: 0.2,
            recorded_at: now,
        };
        let snapshot = rep(0.9, 0.5).with_stake(3.0);

        let update = engine.feedback(Some(&snapshot), &org, &history, sample, 2, now).unwrap();
        // (1 + 1 + 0.7) / 3
        assert!((update.reputation.consistency_score - 0.9).abs() < 1e-9);
        assert_eq!(update.reputation.base_reputation, 0.9);
        assert_eq!(update.reputation.stake_pledge, 3.0);
        assert_eq!(update.reputation.contribution_count, 1);
    }

    #[test]
    fn test_feedback_rescoring_same_contribution_does_not_count() {
        let engine = WeightingEngine::default();
        let now = Utc::now();
        let org = OrgHandle::new("org");
        let contributed_at = now - chrono::Duration::hours(6);
        let sample = ConsistencySample {
            rule_id: RuleId::new("r"),
            contributed: 0.1,
            consensus_at_time: 0.1,
            recorded_at: contributed_at,
        };

        let first = engine.feedback(None, &org, &[], sample.clone(), 1, now).unwrap();
        assert_eq!(first.reputation.contribution_count, 1);

        // Same contribution set again, with a refined consensus.
        let history = vec![first.sample.clone()];
        let rescored = ConsistencySample {
            consensus_at_time: 0.12,
            ..sample
        };
        let second = engine
            .feedback(Some(&first.reputation), &org, &history, rescored, 2, now)
            .unwrap();
        assert_eq!(second.reputation.contribution_count, 1);
        assert_eq!(second.reputation.consistency_score, 0.5);
        assert_eq!(second.sample.recorded_at, contributed_at);
    }

    #[test]
    fn test_feedback_skips_expired_contribution() {
        let engine = WeightingEngine::default();
        let now = Utc::now();
        let sample = ConsistencySample {
            rule_id: RuleId::new("r"),
            contributed: 0.9,
            consensus_at_time: 0.1,
            recorded_at: now - chrono::Duration::days(400),
        };

        assert!(engine.feedback(None, &OrgHandle::new("org"), &[], sample, 1, now).is_none());
    }
}
