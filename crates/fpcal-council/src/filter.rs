//! Byzantine filter pipeline.
//!
//! Five strictly sequential stages over the weighted contributor list for
//! one rule. Each stage only sees the survivors of the previous one, and a
//! dropped contributor is recorded once, at the first stage that drops it.
//!
//! ```text
//!  weighted contributors
//!          │
//!          ▼
//!  1. missing weight ──────────▶ MissingWeight
//!  2. minimum reputation ──────▶ LowReputation      (if enabled)
//!  3. stake required ──────────▶ NoStake            (if enabled)
//!  4. z-score outliers ────────▶ StatisticalOutlier (n ≥ min_contributors)
//!  5. bottom weight percentile ▶ LowPercentile
//!          │
//!          ▼
//!  trusted contributors
//! ```
//!
//! ## Known Limitation
//!
//! With few contributors a single extreme value inflates σ enough to hide
//! itself: `[0.10, 0.12, 0.11, 0.10, 0.11, 0.95]` gives z(0.95) ≈ 2.23 and
//! survives the default threshold of 3.0. This is kept as is; the percentile
//! stage and consistency-based weighting are the second line of defense.

use std::collections::HashSet;
use std::fmt;

use fpcal_trust::OrgHandle;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::stats::{mean, population_std_dev, SIGMA_EPSILON};

/// Configuration for the filter pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Contributors with |z| above this are outliers.
    pub z_score_threshold: f64,
    /// Fraction of lowest-weight contributors excluded in stage 5.
    pub byzantine_filter_percentile: f64,
    /// Minimum surviving population before the z-score stage runs.
    pub min_contributors_for_filtering: usize,
    /// Enables stage 3.
    pub require_stake: bool,
    /// Enables stage 2.
    pub require_minimum_reputation: bool,
    /// Stage 2 threshold on contribution weight.
    pub minimum_reputation_score: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            z_score_threshold: 3.0,
            byzantine_filter_percentile: 0.2,
            min_contributors_for_filtering: 5,
            require_stake: false,
            require_minimum_reputation: true,
            minimum_reputation_score: 0.1,
        }
    }
}

/// A contributor entering the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedContributor {
    /// Opaque handle.
    pub org_handle: OrgHandle,
    /// The organization's FP rate for the rule.
    pub fp_rate: f64,
    /// Contribution weight, `None` when it could not be resolved.
    pub weight: Option<f64>,
    /// Pledged stake.
    pub stake_pledge: f64,
    /// Events behind `fp_rate`.
    pub event_count: u64,
}

/// A contributor that survived every stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustedContributor {
    /// Opaque handle.
    pub org_handle: OrgHandle,
    /// The organization's FP rate for the rule.
    pub fp_rate: f64,
    /// Resolved, non-negative contribution weight.
    pub weight: f64,
    /// Pledged stake.
    pub stake_pledge: f64,
    /// Events behind `fp_rate`.
    pub event_count: u64,
}

/// The stage that excluded a contributor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterStage {
    /// No resolvable weight (missing reputation record).
    MissingWeight,
    /// Weight under the minimum reputation score.
    LowReputation,
    /// Stake required but none pledged.
    NoStake,
    /// |z| above the threshold.
    StatisticalOutlier,
    /// In the bottom weight percentile.
    LowPercentile,
}

impl fmt::Display for FilterStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FilterStage::MissingWeight => "missing_weight",
            FilterStage::LowReputation => "low_reputation",
            FilterStage::NoStake => "no_stake",
            FilterStage::StatisticalOutlier => "statistical_outlier",
            FilterStage::LowPercentile => "low_percentile",
        };
        f.write_str(label)
    }
}

/// Why a contributor was excluded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterDecision {
    /// Excluded contributor.
    pub org_handle: OrgHandle,
    /// Stage that excluded it.
    pub stage: FilterStage,
    /// Human-readable detail.
    pub reason: String,
}

/// Output of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterOutcome {
    /// Survivors, in input order.
    pub trusted: Vec<TrustedContributor>,
    /// Exclusions, in the order they were made.
    pub excluded: Vec<FilterDecision>,
    /// Size of the input list.
    pub total: usize,
}

impl FilterOutcome {
    /// Fraction of the input that was excluded.
    pub fn filter_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.excluded.len() as f64 / self.total as f64
        }
    }

    /// Number of exclusions made at `stage`.
    pub fn count(&self, stage: FilterStage) -> usize {
        self.excluded.iter().filter(|d| d.stage == stage).count()
    }

    /// Exclusions due to statistical outliers.
    pub fn outlier_count(&self) -> usize {
        self.count(FilterStage::StatisticalOutlier)
    }

    /// Exclusions due to low weight, absolute or relative.
    pub fn low_reputation_count(&self) -> usize {
        self.count(FilterStage::LowReputation) + self.count(FilterStage::LowPercentile)
    }
}

/// Summary of filtering attached to a consensus result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilteringSummary {
    /// Excluded / total.
    pub filter_rate: f64,
    /// Statistical outlier exclusions.
    pub outlier_count: usize,
    /// Low reputation and low percentile exclusions.
    pub low_reputation_count: usize,
    /// Every exclusion with its stage.
    pub excluded: Vec<FilterDecision>,
    /// Configuration the pipeline ran with.
    pub config: FilterConfig,
}

impl FilteringSummary {
    /// Summarizes an outcome.
    pub fn from_outcome(outcome: &FilterOutcome, config: &FilterConfig) -> Self {
        Self {
            filter_rate: outcome.filter_rate(),
            outlier_count: outcome.outlier_count(),
            low_reputation_count: outcome.low_reputation_count(),
            excluded: outcome.excluded.clone(),
            config: config.clone(),
        }
    }
}

/// The five-stage Byzantine filter.
#[derive(Debug, Clone, Default)]
pub struct ByzantineFilter {
    config: FilterConfig,
}

impl ByzantineFilter {
    /// Creates a filter with the given configuration.
    pub fn new(config: FilterConfig) -> Self {
        Self { config }
    }

    /// Returns the filter configuration.
    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Runs every stage in order.
    pub fn apply(&self, contributors: Vec<WeightedContributor>) -> FilterOutcome {
        let total = contributors.len();
        let mut excluded = Vec::new();

        let survivors = self.resolve_weights(contributors, &mut excluded);
        let survivors = self.minimum_reputation(survivors, &mut excluded);
        let survivors = self.stake_requirement(survivors, &mut excluded);
        let survivors = self.statistical_outliers(survivors, &mut excluded);
        let trusted = self.reputation_percentile(survivors, &mut excluded);

        FilterOutcome {
            trusted,
            excluded,
            total,
        }
    }

    /// Stage 1.
    fn resolve_weights(
        &self,
        contributors: Vec<WeightedContributor>,
        excluded: &mut Vec<FilterDecision>,
    ) -> Vec<TrustedContributor> {
        let before = excluded.len();
        let mut survivors = Vec::with_capacity(contributors.len());

        for c in contributors {
            match c.weight {
                Some(weight) if weight.is_finite() => survivors.push(TrustedContributor {
                    org_handle: c.org_handle,
                    fp_rate: c.fp_rate,
                    weight: weight.max(0.0),
                    stake_pledge: c.stake_pledge,
                    event_count: c.event_count,
                }),
                _ => excluded.push(FilterDecision {
                    org_handle: c.org_handle,
                    stage: FilterStage::MissingWeight,
                    reason: "no resolvable contribution weight".to_string(),
                }),
            }
        }

        debug!("Stage missing_weight dropped {}", excluded.len() - before);
        survivors
    }

    /// Stage 2.
    fn minimum_reputation(
        &self,
        contributors: Vec<TrustedContributor>,
        excluded: &mut Vec<FilterDecision>,
    ) -> Vec<TrustedContributor> {
        if !self.config.require_minimum_reputation {
            return contributors;
        }

        let threshold = self.config.minimum_reputation_score;
        let before = excluded.len();
        let survivors = partition_into(contributors, excluded, |c| {
            if c.weight < threshold {
                Some((
                    FilterStage::LowReputation,
                    format!("weight {:.4} below minimum {:.4}", c.weight, threshold),
                ))
            } else {
                None
            }
        });

        debug!("Stage low_reputation dropped {}", excluded.len() - before);
        survivors
    }

    /// Stage 3.
    fn stake_requirement(
        &self,
        contributors: Vec<TrustedContributor>,
        excluded: &mut Vec<FilterDecision>,
    ) -> Vec<TrustedContributor> {
        if !self.config.require_stake {
            return contributors;
        }

        let before = excluded.len();
        let survivors = partition_into(contributors, excluded, |c| {
            if c.stake_pledge > 0.0 {
                None
            } else {
                Some((FilterStage::NoStake, "no stake pledged".to_string()))
            }
        });

        debug!("Stage no_stake dropped {}", excluded.len() - before);
        survivors
    }

    /// Stage 4.
    fn statistical_outliers(
        &self,
        contributors: Vec<TrustedContributor>,
        excluded: &mut Vec<FilterDecision>,
    ) -> Vec<TrustedContributor> {
        if contributors.len() < self.config.min_contributors_for_filtering {
            debug!(
                "Stage statistical_outlier skipped: {} contributors below minimum {}",
                contributors.len(),
                self.config.min_contributors_for_filtering
            );
            return contributors;
        }

        let rates: Vec<f64> = contributors.iter().map(|c| c.fp_rate).collect();
        let (mu, sigma) = match (mean(&rates), population_std_dev(&rates)) {
            (Some(mu), Some(sigma)) => (mu, sigma),
            _ => return contributors,
        };

        if sigma <= SIGMA_EPSILON {
            debug!("Stage statistical_outlier skipped: zero variance");
            return contributors;
        }

        let threshold = self.config.z_score_threshold;
        let before = excluded.len();
        let survivors = partition_into(contributors, excluded, |c| {
            let z = (c.fp_rate - mu).abs() / sigma;
            if z > threshold {
                Some((
                    FilterStage::StatisticalOutlier,
                    format!("|z| = {:.3} exceeds {:.3}", z, threshold),
                ))
            } else {
                None
            }
        });

        debug!(
            "Stage statistical_outlier dropped {} (mean {:.4}, sigma {:.4})",
            excluded.len() - before,
            mu,
            sigma
        );
        survivors
    }

    /// Stage 5.
    fn reputation_percentile(
        &self,
        contributors: Vec<TrustedContributor>,
        excluded: &mut Vec<FilterDecision>,
    ) -> Vec<TrustedContributor> {
        let drop_count = percentile_drop_count(contributors.len(), self.config.byzantine_filter_percentile);
        if drop_count == 0 {
            return contributors;
        }

        let mut order: Vec<usize> = (0..contributors.len()).collect();
        order.sort_by(|&a, &b| {
            contributors[a]
                .weight
                .total_cmp(&contributors[b].weight)
                .then_with(|| contributors[a].org_handle.cmp(&contributors[b].org_handle))
        });
        let dropped: HashSet<usize> = order.into_iter().take(drop_count).collect();

        let percentile = self.config.byzantine_filter_percentile;
        let mut survivors = Vec::with_capacity(contributors.len() - drop_count);
        for (idx, c) in contributors.into_iter().enumerate() {
            if dropped.contains(&idx) {
                excluded.push(FilterDecision {
                    reason: format!(
                        "weight {:.4} in bottom {:.0}% of contributors",
                        c.weight,
                        percentile * 100.0
                    ),
                    org_handle: c.org_handle,
                    stage: FilterStage::LowPercentile,
                });
            } else {
                survivors.push(c);
            }
        }

        debug!("Stage low_percentile dropped {}", drop_count);
        survivors
    }
}

/// Number of contributors the percentile stage drops, rounded down.
pub fn percentile_drop_count(population: usize, percentile: f64) -> usize {
    if population == 0 || !percentile.is_finite() || percentile <= 0.0 {
        return 0;
    }
    // Absorb representation error so that 10 * 0.2 yields 2, not 1.
    let raw = (population as f64 * percentile + 1e-9).floor();
    (raw as usize).min(population)
}

fn partition_into<F>(
    contributors: Vec<TrustedContributor>,
    excluded: &mut Vec<FilterDecision>,
    mut verdict: F,
) -> Vec<TrustedContributor>
where
    F: FnMut(&TrustedContributor) -> Option<(FilterStage, String)>,
{
    let mut survivors = Vec::with_capacity(contributors.len());
    for c in contributors {
        match verdict(&c) {
            Some((stage, reason)) => excluded.push(FilterDecision {
                org_handle: c.org_handle,
                stage,
                reason,
            }),
            None => survivors.push(c),
        }
    }
    survivors
}
