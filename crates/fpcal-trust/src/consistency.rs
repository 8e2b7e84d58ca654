//! Consistency scoring with exponential time decay.
//!
//! Measures how closely an organization's past contributions tracked the
//! network consensus of their round. Recent agreement counts more than old
//! agreement; history past the lookback horizon is ignored entirely.
//!
//! ## Formula
//!
//! ```text
//! consistency_i = 1 - min(|contributed_i - consensus_i|, 1.0)
//! weight_i      = exp(-decay_rate * age_days_i)
//! score         = Σ(weight_i * consistency_i) / Σ(weight_i)
//! ```
//!
//! With the default `decay_rate = 0.01` a sample loses half its influence in
//! roughly 70 days.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{ConsistencySample, NEUTRAL_CONSISTENCY};

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Configuration for the consistency scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsistencyConfig {
    /// Exponential decay rate λ per day.
    pub decay_rate: f64,
    /// Samples older than this many days are ignored.
    pub max_contribution_age_days: u32,
    /// Below this many qualifying samples the neutral score is used.
    pub min_contributions_required: usize,
    /// Deviation above which a sample is flagged as an outlier.
    pub outlier_threshold: f64,
    /// Strict mode: flagged outliers do not count toward the score.
    pub exclude_outliers_from_score: bool,
}

impl Default for ConsistencyConfig {
    fn default() -> Self {
        Self {
            decay_rate: 0.01,
            max_contribution_age_days: 180,
            min_contributions_required: 3,
            outlier_threshold: 0.30,
            exclude_outliers_from_score: false,
        }
    }
}

impl ConsistencyConfig {
    /// Earliest sample time still inside the lookback horizon as of `now`.
    pub fn horizon_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(Duration::days(i64::from(self.max_contribution_age_days)))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// Outcome of scoring one organization's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyReport {
    /// Score in [0, 1].
    pub score: f64,
    /// Samples that contributed to the score.
    pub considered: usize,
    /// Samples dropped for being past the horizon.
    pub expired: usize,
    /// Indices (into the scored slice) of samples flagged as outliers.
    pub outliers: Vec<usize>,
    /// True when the neutral cold-start score was used.
    pub cold_start: bool,
}

/// Agreement of a single contribution with the consensus of its round.
///
/// ```rust
/// use fpcal_trust::consistency::contribution_consistency;
///
/// let c = contribution_consistency(0.15, 0.20);
/// assert!((c - 0.95).abs() < 1e-12);
/// ```
pub fn contribution_consistency(contributed: f64, consensus_at_time: f64) -> f64 {
    1.0 - (contributed - consensus_at_time).abs().min(1.0)
}

/// Time-decayed consistency scorer.
#[derive(Debug, Clone, Default)]
pub struct ConsistencyScorer {
    config: ConsistencyConfig,
}

impl ConsistencyScorer {
    /// Creates a scorer with the given configuration.
    pub fn new(config: ConsistencyConfig) -> Self {
        Self { config }
    }

    /// Returns the scorer configuration.
    pub fn config(&self) -> &ConsistencyConfig {
        &self.config
    }

    /// True if a sample recorded at `recorded_at` still counts as of `now`.
    pub fn is_within_horizon(&self, recorded_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        recorded_at >= self.config.horizon_start(now)
    }

    /// Scores a history of samples as of `now`.
    ///
    /// Samples dated after `now` are treated as age zero.
    pub fn score(&self, samples: &[ConsistencySample], now: DateTime<Utc>) -> ConsistencyReport {
        let horizon_start = self.config.horizon_start(now);

        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;
        let mut considered = 0usize;
        let mut expired = 0usize;
        let mut outliers = Vec::new();

        for (idx, sample) in samples.iter().enumerate() {
            if sample.recorded_at < horizon_start {
                expired += 1;
                continue;
            }
            let age_days = age_in_days(sample.recorded_at, now);

            let deviation = (sample.contributed - sample.consensus_at_time).abs();
            let is_outlier = deviation > self.config.outlier_threshold;
            if is_outlier {
                outliers.push(idx);
                if self.config.exclude_outliers_from_score {
                    continue;
                }
            }

            let weight = (-self.config.decay_rate * age_days).exp();
            weighted_sum += weight * contribution_consistency(sample.contributed, sample.consensus_at_time);
            weight_total += weight;
            considered += 1;
        }

        let cold_start = considered < self.config.min_contributions_required;
        let score = if cold_start || weight_total <= 0.0 {
            NEUTRAL_CONSISTENCY
        } else {
            (weighted_sum / weight_total).clamp(0.0, 1.0)
        };

        ConsistencyReport {
            score,
            considered,
            expired,
            outliers,
            cold_start: cold_start || weight_total <= 0.0,
        }
    }
}

fn age_in_days(recorded_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let seconds = (now - recorded_at).num_seconds().max(0);
    seconds as f64 / SECONDS_PER_DAY
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RuleId;

    fn sample(contributed: f64, consensus: f64, days_ago: i64, now: DateTime<Utc>) -> ConsistencySample {
        ConsistencySample {
            rule_id: RuleId::new("rule"),
            contributed,
            consensus_at_time: consensus,
            recorded_at: now - Duration::days(days_ago),
        }
    }

    #[test]
    fn test_contribution_consistency() {
        assert!((contribution_consistency(0.15, 0.20) - 0.95).abs() < 1e-12);
        assert_eq!(contribution_consistency(0.3, 0.3), 1.0);
        assert_eq!(contribution_consistency(0.0, 1.0), 0.0);
    }

    #[test]
    fn test_cold_start_is_neutral() {
        let now = Utc::now();
        let scorer = ConsistencyScorer::default();
        let samples = vec![sample(0.9, 0.1, 1, now), sample(0.9, 0.1, 2, now)];

        let report = scorer.score(&samples, now);
        assert!(report.cold_start);
        assert_eq!(report.score, 0.5);
        assert_eq!(report.considered, 2);
    }

    #[test]
    fn test_perfect_history_scores_one() {
        let now = Utc::now();
        let scorer = ConsistencyScorer::default();
        let samples: Vec<_> = (0..5).map(|d| sample(0.2, 0.2, d, now)).collect();

        let report = scorer.score(&samples, now);
        assert!(!report.cold_start);
        assert!((report.score - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_recent_samples_dominate() {
        let now = Utc::now();
        let scorer = ConsistencyScorer::default();
        // Old disagreement, recent agreement.
        let samples = vec![
            sample(0.6, 0.1, 150, now),
            sample(0.1, 0.1, 1, now),
            sample(0.1, 0.1, 2, now),
        ];

        let report = scorer.score(&samples, now);
        // Unweighted mean would be (0.5 + 1 + 1) / 3 = 0.833.
        assert!(report.score > 0.85);
        assert!(report.score < 1.0);
    }

    #[test]
    fn test_expired_samples_ignored() {
        let now = Utc::now();
        let scorer = ConsistencyScorer::default();
        let samples = vec![
            sample(1.0, 0.0, 200, now),
            sample(0.1, 0.1, 1, now),
            sample(0.1, 0.1, 2, now),
            sample(0.1, 0.1, 3, now),
        ];

        let report = scorer.score(&samples, now);
        assert_eq!(report.expired, 1);
        assert_eq!(report.considered, 3);
        assert!((report.score - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_horizon_boundary() {
        let now = Utc::now();
        let scorer = ConsistencyScorer::default();
        assert_eq!(scorer.config().horizon_start(now), now - Duration::days(180));
        assert!(scorer.is_within_horizon(now - Duration::days(179), now));
        assert!(!scorer.is_within_horizon(now - Duration::days(181), now));
        assert!(scorer.is_within_horizon(now + Duration::days(1), now));
    }

    #[test]
    fn test_outliers_flagged_but_counted() {
        let now = Utc::now();
        let scorer = ConsistencyScorer::default();
        let samples = vec![
            sample(0.1, 0.1, 0, now),
            sample(0.1, 0.1, 0, now),
            sample(0.6, 0.1, 0, now),
        ];

        let report = scorer.score(&samples, now);
        assert_eq!(report.outliers, vec![2]);
        assert_eq!(report.considered, 3);
        // (1 + 1 + 0.5) / 3
        assert!((report.score - 2.5 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_strict_mode_excludes_outliers() {
        let now = Utc::now();
        let scorer = ConsistencyScorer::new(ConsistencyConfig {
            exclude_outliers_from_score: true,
            ..ConsistencyConfig::default()
        });
        let samples = vec![
            sample(0.1, 0.1, 0, now),
            sample(0.1, 0.1, 0, now),
            sample(0.12, 0.1, 0, now),
            sample(0.6, 0.1, 0, now),
        ];

        let report = scorer.score(&samples, now);
        assert_eq!(report.outliers, vec![3]);
        assert_eq!(report.considered, 3);
        assert!(report.score > 0.99);
    }

    #[test]
    fn test_strict_mode_can_fall_back_to_cold_start() {
        let now = Utc::now();
        let scorer = ConsistencyScorer::new(ConsistencyConfig {
            exclude_outliers_from_score: true,
            ..ConsistencyConfig::default()
        });
        let samples = vec![
            sample(0.1, 0.1, 0, now),
            sample(0.9, 0.1, 0, now),
            sample(0.9, 0.1, 0, now),
        ];

        let report = scorer.score(&samples, now);
        assert!(report.cold_start);
        assert_eq!(report.score, 0.5);
    }

    #[test]
    fn test_future_samples_have_zero_age() {
        let now = Utc::now();
        let scorer = ConsistencyScorer::default();
        let samples: Vec<_> = (0..3).map(|_| sample(0.2, 0.3, -5, now)).collect();

        let report = scorer.score(&samples, now);
        assert_eq!(report.expired, 0);
        assert!((report.score - 0.9).abs() < 1e-9);
    }
}
