//! Weighted consensus and confidence scoring.
//!
//! Computes the reputation-weighted average FP rate over the trusted
//! contributors, plus a four-factor confidence estimate.
//!
//! # Confidence Factors
//!
//! | Factor | Normalization | Weight |
//! |--------|---------------|--------|
//! | Contributor count | `min(n / 20, 1)` | 0.35 |
//! | Agreement | `max(0, 1 - CV)` | 0.30 |
//! | Event volume | `min(events / 1000, 1)` | 0.20 |
//! | Average reputation | `min(mean weight, 1)` | 0.15 |

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::filter::TrustedContributor;
use crate::stats::{coefficient_of_variation, mean};

/// Contributors needed for a full contributor-count factor.
pub const FULL_CONTRIBUTOR_COUNT: f64 = 20.0;
/// Events needed for a full event-volume factor.
pub const FULL_EVENT_VOLUME: f64 = 1000.0;
/// Below this many trusted contributors confidence is always insufficient.
pub const MIN_TRUSTED_FOR_CONFIDENCE: usize = 3;

const CONTRIBUTOR_COUNT_WEIGHT: f64 = 0.35;
const AGREEMENT_WEIGHT: f64 = 0.30;
const EVENT_VOLUME_WEIGHT: f64 = 0.20;
const REPUTATION_WEIGHT: f64 = 0.15;

/// Coarse reliability bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceCategory {
    /// Not enough trusted data to rely on.
    Insufficient,
    /// Usable with caution.
    Low,
    /// Reasonably reliable.
    Medium,
    /// Reliable.
    High,
}

impl ConfidenceCategory {
    /// Maps a confidence score to a category.
    ///
    /// Fewer than three trusted contributors always maps to `Insufficient`.
    pub fn classify(score: f64, trusted_count: usize) -> Self {
        if trusted_count < MIN_TRUSTED_FOR_CONFIDENCE {
            return Self::Insufficient;
        }
        if score >= 0.70 {
            Self::High
        } else if score >= 0.50 {
            Self::Medium
        } else if score >= 0.30 {
            Self::Low
        } else {
            Self::Insufficient
        }
    }
}

impl fmt::Display for ConfidenceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Insufficient => write!(f, "insufficient"),
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// The normalized inputs to the confidence score, each in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ConfidenceFactors {
    /// `min(trusted_count / 20, 1)`.
    pub contributor_count: f64,
    /// `max(0, 1 - CV(rates))`.
    pub agreement: f64,
    /// `min(total_events / 1000, 1)`.
    pub event_volume: f64,
    /// Mean trusted weight, capped at 1.
    pub average_reputation: f64,
}

impl ConfidenceFactors {
    /// Weighted sum of the factors.
    pub fn score(&self) -> f64 {
        self.contributor_count * CONTRIBUTOR_COUNT_WEIGHT
            + self.agreement * AGREEMENT_WEIGHT
            + self.event_volume * EVENT_VOLUME_WEIGHT
            + self.average_reputation * REPUTATION_WEIGHT
    }
}

/// Confidence attached to a consensus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Confidence {
    /// Numeric score in [0, 1].
    pub level: f64,
    /// Bucket derived from `level` and the trusted count.
    pub category: ConfidenceCategory,
    /// The individual factors.
    pub factors: ConfidenceFactors,
}

impl Confidence {
    /// Confidence for an empty trusted set.
    pub fn insufficient() -> Self {
        Self {
            level: 0.0,
            category: ConfidenceCategory::Insufficient,
            factors: ConfidenceFactors::default(),
        }
    }
}

/// Consensus over the trusted contributors of one rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusEstimate {
    /// Weighted-average FP rate.
    pub fp_rate: f64,
    /// Confidence in `fp_rate`.
    pub confidence: Confidence,
    /// Number of trusted contributors.
    pub trusted_count: usize,
    /// Events across trusted contributors.
    pub total_events: u64,
}

/// Weighted consensus calculator.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsensusCalculator;

impl ConsensusCalculator {
    /// Creates a calculator.
    pub fn new() -> Self {
        Self
    }

    /// Computes the consensus and its confidence.
    pub fn compute(&self, trusted: &[TrustedContributor]) -> ConsensusEstimate {
        if trusted.is_empty() {
            return ConsensusEstimate {
                fp_rate: 0.0,
                confidence: Confidence::insufficient(),
                trusted_count: 0,
                total_events: 0,
            };
        }

        let total_events = trusted
            .iter()
            .fold(0u64, |acc, c| acc.saturating_add(c.event_count));
        let fp_rate = weighted_rate(trusted);
        let factors = self.factors(trusted, total_events);
        let level = factors.score().clamp(0.0, 1.0);

        ConsensusEstimate {
            fp_rate,
            confidence: Confidence {
                level,
                category: ConfidenceCategory::classify(level, trusted.len()),
                factors,
            },
            trusted_count: trusted.len(),
            total_events,
        }
    }

    /// Computes the four normalized confidence factors.
    pub fn factors(&self, trusted: &[TrustedContributor], total_events: u64) -> ConfidenceFactors {
        let rates: Vec<f64> = trusted.iter().map(|c| c.fp_rate).collect();
        let weights: Vec<f64> = trusted.iter().map(|c| c.weight).collect();

        let contributor_count = (trusted.len() as f64 / FULL_CONTRIBUTOR_COUNT).min(1.0);
        let agreement = coefficient_of_variation(&rates)
            .map(|cv| (1.0 - cv).max(0.0))
            .unwrap_or(0.0);
        let event_volume = (total_events as f64 / FULL_EVENT_VOLUME).min(1.0);
        let average_reputation = mean(&weights).map(|m| m.clamp(0.0, 1.0)).unwrap_or(0.0);

        ConfidenceFactors {
            contributor_count,
            agreement,
            event_volume,
            average_reputation,
        }
    }
}

/// `Σ(w·x)/Σ(w)`, clamped into the range of the inputs. Falls back to the
/// plain mean when every weight is zero.
fn weighted_rate(trusted: &[TrustedContributor]) -> f64 {
    let min = trusted.iter().map(|c| c.fp_rate).fold(f64::INFINITY, f64::min);
    let max = trusted.iter().map(|c| c.fp_rate).fold(f64::NEG_INFINITY, f64::max);

    let total_weight: f64 = trusted.iter().map(|c| c.weight).sum();
    let rate = if total_weight > 0.0 {
        trusted.iter().map(|c| c.weight * c.fp_rate).sum::<f64>() / total_weight
    } else {
        trusted.iter().map(|c| c.fp_rate).sum::<f64>() / trusted.len() as f64
    };

    rate.clamp(min, max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fpcal_trust::OrgHandle;

    fn trusted(id: &str, fp_rate: f64, weight: f64, events: u64) -> TrustedContributor {
        TrustedContributor {
            org_handle: OrgHandle::new(id),
            fp_rate,
            weight,
            stake_pledge: 0.0,
            event_count: events,
        }
    }

    #[test]
    fn test_category_boundaries() {
        assert_eq!(ConfidenceCategory::classify(0.70, 10), ConfidenceCategory::High);
        assert_eq!(ConfidenceCategory::classify(0.69, 10), ConfidenceCategory::Medium);
        assert_eq!(ConfidenceCategory::classify(0.50, 10), ConfidenceCategory::Medium);
        assert_eq!(ConfidenceCategory::classify(0.49, 10), ConfidenceCategory::Low);
        assert_eq!(ConfidenceCategory::classify(0.30, 10), ConfidenceCategory::Low);
        assert_eq!(ConfidenceCategory::classify(0.29, 10), ConfidenceCategory::Insufficient);
    }

    #[test]
    fn test_small_trusted_set_forced_insufficient() {
        assert_eq!(ConfidenceCategory::classify(0.80, 2), ConfidenceCategory::Insufficient);
        assert_eq!(ConfidenceCategory::classify(0.80, 3), ConfidenceCategory::High);
    }

    #[test]
    fn test_empty_trusted_set() {
        let estimate = ConsensusCalculator::new().compute(&[]);
        assert_eq!(estimate.fp_rate, 0.0);
        assert_eq!(estimate.trusted_count, 0);
        assert_eq!(estimate.confidence.category, ConfidenceCategory::Insufficient);
    }

    #[test]
    fn test_weighted_average() {
        let set = vec![trusted("a", 0.10, 3.0, 10), trusted("b", 0.30, 1.0, 10)];
        let estimate = ConsensusCalculator::new().compute(&set);
        // (0.3 + 0.3) / 4 = 0.15
        assert!((estimate.fp_rate - 0.15).abs() < 1e-12);
        assert_eq!(estimate.total_events, 20);
    }

    #[test]
    fn test_zero_total_weight_uses_plain_mean() {
        let set = vec![trusted("a", 0.10, 0.0, 1), trusted("b", 0.30, 0.0, 1)];
        let estimate = ConsensusCalculator::new().compute(&set);
        assert!((estimate.fp_rate - 0.20).abs() < 1e-12);
    }

    #[test]
    fn test_consensus_within_bounds() {
        let set: Vec<_> = (0..15)
            .map(|i| trusted(&format!("o{}", i), 0.05 + i as f64 * 0.013, 0.1 + i as f64 * 0.07, 50))
            .collect();
        let estimate = ConsensusCalculator::new().compute(&set);
        assert!(estimate.fp_rate >= 0.05);
        assert!(estimate.fp_rate <= 0.05 + 14.0 * 0.013);
    }

    #[test]
    fn test_full_confidence() {
        let set: Vec<_> = (0..20).map(|i| trusted(&format!("o{}", i), 0.1, 1.0, 100)).collect();
        let estimate = ConsensusCalculator::new().compute(&set);

        let f = estimate.confidence.factors;
        assert_eq!(f.contributor_count, 1.0);
        assert!((f.agreement - 1.0).abs() < 1e-9);
        assert_eq!(f.event_volume, 1.0);
        assert_eq!(f.average_reputation, 1.0);
        assert!((estimate.confidence.level - 1.0).abs() < 1e-9);
        assert_eq!(estimate.confidence.category, ConfidenceCategory::High);
    }

    #[test]
    fn test_factor_arithmetic() {
        // 10 contributors, identical rates, 500 events, mean weight 0.5
        let set: Vec<_> = (0..10).map(|i| trusted(&format!("o{}", i), 0.2, 0.5, 50)).collect();
        let estimate = ConsensusCalculator::new().compute(&set);

        // 0.5*0.35 + 1*0.30 + 0.5*0.20 + 0.5*0.15 = 0.65
        assert!((estimate.confidence.level - 0.65).abs() < 1e-9);
        assert_eq!(estimate.confidence.category, ConfidenceCategory::Medium);
    }

    #[test]
    fn test_category_serialization() {
        let json = serde_json::to_string(&ConfidenceCategory::Insufficient).unwrap();
        assert_eq!(json, "\"insufficient\"");
    }
}
