//! # Core Data Models for Contributor Trust
//!
//! This module defines the types shared by every stage of the calibration
//! pipeline: opaque organization handles, rule identifiers, contributions
//! and the per-organization reputation record.
//!
//! ## Threat Model
//!
//! The types in this module help defend against:
//!
//! - **Identity Leakage**: [`OrgHandle`] is an opaque token. It carries no
//!   structure that could be reversed into a real organization identity.
//! - **Malformed Reports**: [`Contribution`] validates rates, so a reporter
//!   cannot inject NaN or out-of-range values into the weighted average.
//! - **Lost Updates**: [`OrganizationReputation::last_round`] lets stores order
//!   concurrent write-backs by round.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Base reputation assigned to an organization on first contribution.
///
/// Equal to the default `minimum_reputation_score`: a newcomer is admitted
/// with the smallest admissible weight.
pub const DEFAULT_BASE_REPUTATION: f64 = 0.1;

/// Consistency score for organizations without enough history.
pub const NEUTRAL_CONSISTENCY: f64 = 0.5;

/// Opaque, pre-anonymized organization identifier.
///
/// Produced by the external identity layer. Equality and ordering are the
/// only meaningful operations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrgHandle(String);

impl OrgHandle {
    /// Wraps an opaque token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the token bytes as a string slice, for storage keys.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrgHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of the detection rule being calibrated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(String);

impl RuleId {
    /// Creates a rule identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a contribution reports about the rule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    /// A single labeled firing: was it a false positive?
    IsFalsePositive(bool),
    /// An aggregate false-positive rate over `event_count` firings.
    FpRate(f64),
}

impl Signal {
    /// The signal expressed as a rate in [0, 1].
    pub fn as_rate(&self) -> f64 {
        match self {
            Signal::IsFalsePositive(true) => 1.0,
            Signal::IsFalsePositive(false) => 0.0,
            Signal::FpRate(rate) => *rate,
        }
    }
}

/// One organization's report for one rule.
///
/// Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    /// Opaque reporter handle.
    pub org_handle: OrgHandle,
    /// Rule the report is about.
    pub rule_id: RuleId,
    /// Reported outcome.
    pub signal: Signal,
    /// Number of rule firings the signal summarizes.
    pub event_count: u64,
    /// When the report was submitted.
    pub timestamp: DateTime<Utc>,
}

impl Contribution {
    /// Creates a rate contribution over `event_count` events.
    ///
    /// # Errors
    ///
    /// Returns [`TrustError::InvalidRate`] if `fp_rate` is not a finite value
    /// in [0, 1].
    pub fn rate(
        org_handle: OrgHandle,
        rule_id: RuleId,
        fp_rate: f64,
        event_count: u64,
        timestamp: DateTime<Utc>,
    ) -> Result<Self> {
        let contribution = Self {
            org_handle,
            rule_id,
            signal: Signal::FpRate(fp_rate),
            event_count,
            timestamp,
        };
        contribution.validate()?;
        Ok(contribution)
    }

    /// Creates a single-event verdict contribution.
    pub fn verdict(
        org_handle: OrgHandle,
        rule_id: RuleId,
        is_false_positive: bool,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            org_handle,
            rule_id,
            signal: Signal::IsFalsePositive(is_false_positive),
            event_count: 1,
            timestamp,
        }
    }

    /// The reported rate in [0, 1].
    pub fn fp_rate(&self) -> f64 {
        self.signal.as_rate()
    }

    /// Checks a contribution that arrived through deserialization.
    pub fn validate(&self) -> Result<()> {
        if let Signal::FpRate(rate) = self.signal {
            if !rate.is_finite() || !(0.0..=1.0).contains(&rate) {
                return Err(TrustError::InvalidRate(rate));
            }
        }
        Ok(())
    }
}

/// Per-organization roll-up of all contributions to a single rule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuleRollup {
    /// Event-weighted FP rate.
    pub fp_rate: f64,
    /// Total events across the rolled-up contributions.
    pub event_count: u64,
    /// Timestamp of the most recent rolled-up contribution. Identifies the
    /// contribution set in consistency history.
    pub latest_timestamp: DateTime<Utc>,
}

impl RuleRollup {
    /// Collapses one organization's contributions for a rule into one rate.
    ///
    /// Rates are weighted by event count. If every contribution reports zero
    /// events the plain mean is used. Returns `None` for an empty slice.
    pub fn from_contributions<'a, I>(contributions: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a Contribution>,
    {
        let mut weighted_sum = 0.0;
        let mut plain_sum = 0.0;
        let mut events: u64 = 0;
        let mut n = 0usize;
        let mut latest: Option<DateTime<Utc>> = None;

        for c in contributions {
            let rate = c.fp_rate();
            weighted_sum += rate * c.event_count as f64;
            plain_sum += rate;
            events = events.saturating_add(c.event_count);
            n += 1;
            latest = Some(latest.map_or(c.timestamp, |t| t.max(c.timestamp)));
        }

        let latest_timestamp = latest?;

        let fp_rate = if events == 0 {
            plain_sum / n as f64
        } else {
            weighted_sum / events as f64
        };

        Some(Self {
            fp_rate: fp_rate.clamp(0.0, 1.0),
            event_count: events,
            latest_timestamp,
        })
    }
}

/// Long-lived trust record for one organization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizationReputation {
    /// Opaque handle.
    pub org_handle: OrgHandle,
    /// Base reputation in [0, 1].
    pub base_reputation: f64,
    /// Time-decayed consistency with past consensus, in [0, 1].
    pub consistency_score: f64,
    /// Pledged economic stake, never negative.
    pub stake_pledge: f64,
    /// Number of distinct contribution sets scored against a consensus. A
    /// rule re-aggregated without new contributions does not count again.
    pub contribution_count: u64,
    /// Last time the record was written.
    pub last_updated: DateTime<Utc>,
    /// Round that last wrote this record. Zero for records never updated by a round.
    #[serde(default)]
    pub last_round: u64,
}

impl OrganizationReputation {
    /// Cold-start record with neutral defaults.
    pub fn new(org_handle: OrgHandle, now: DateTime<Utc>) -> Self {
        Self {
            org_handle,
            base_reputation: DEFAULT_BASE_REPUTATION,
            consistency_score: NEUTRAL_CONSISTENCY,
            stake_pledge: 0.0,
            contribution_count: 0,
            last_updated: now,
            last_round: 0,
        }
    }

    /// Sets the base reputation.
    pub fn with_base_reputation(mut self, base: f64) -> Self {
        self.base_reputation = base;
        self
    }

    /// Sets the consistency score.
    pub fn with_consistency(mut self, score: f64) -> Self {
        self.consistency_score = score;
        self
    }

    /// Sets the pledged stake.
    pub fn with_stake(mut self, stake: f64) -> Self {
        self.stake_pledge = stake;
        self
    }

    /// Checks the record's numeric ranges.
    pub fn validate(&self) -> Result<()> {
        if !self.base_reputation.is_finite() || !(0.0..=1.0).contains(&self.base_reputation) {
            return Err(TrustError::InvalidReputation {
                field: "base_reputation",
                value: self.base_reputation,
            });
        }
        if !self.consistency_score.is_finite() || !(0.0..=1.0).contains(&self.consistency_score)
        {
            return Err(TrustError::InvalidReputation {
                field: "consistency_score",
                value: self.consistency_score,
            });
        }
        if !self.stake_pledge.is_finite() || self.stake_pledge < 0.0 {
            return Err(TrustError::InvalidReputation {
                field: "stake_pledge",
                value: self.stake_pledge,
            });
        }
        Ok(())
    }
}

/// One point of an organization's consistency history: what it reported for
/// a rule versus what the network agreed on in that round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencySample {
    /// Rule the sample belongs to.
    pub rule_id: RuleId,
    /// Rate the organization contributed.
    pub contributed: f64,
    /// Network consensus for that rule in the same round.
    pub consensus_at_time: f64,
    /// Timestamp of the latest contribution the sample covers.
    pub recorded_at: DateTime<Utc>,
}

impl ConsistencySample {
    /// True if both samples cover the same contribution set: same rule and
    /// same latest contribution time.
    pub fn same_contribution(&self, other: &ConsistencySample) -> bool {
        self.rule_id == other.rule_id && self.recorded_at == other.recorded_at
    }
}

/// Post-round write-back for one organization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReputationUpdate {
    /// The new reputation record.
    pub reputation: OrganizationReputation,
    /// The history sample produced by this round.
    pub sample: ConsistencySample,
}

/// Errors raised while constructing or validating trust data.
#[derive(Debug, Error, PartialEq)]
pub enum TrustError {
    /// A contributed FP rate is NaN, infinite, or outside [0, 1].
    #[error("invalid FP rate {0}: must be a finite value in [0, 1]")]
    InvalidRate(f64),

    /// A reputation field is outside its allowed range.
    #[error("invalid reputation field {field}: {value}")]
    InvalidReputation {
        /// Name of the offending field.
        field: &'static str,
        /// The rejected value.
        value: f64,
    },
}

/// Result type for trust operations.
pub type Result<T> = std::result::Result<T, TrustError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(s: &str) -> OrgHandle {
        OrgHandle::new(s)
    }

    #[test]
    fn test_rate_contribution_rejects_out_of_range() {
        let rule = RuleId::new("r1");
        let err = Contribution::rate(handle("a"), rule.clone(), 1.5, 10, Utc::now()).unwrap_err();
        assert_eq!(err, TrustError::InvalidRate(1.5));

        assert!(Contribution::rate(handle("a"), rule, f64::NAN, 10, Utc::now()).is_err());
    }

    #[test]
    fn test_verdict_as_rate() {
        let c = Contribution::verdict(handle("a"), RuleId::new("r1"), true, Utc::now());
        assert_eq!(c.fp_rate(), 1.0);
        assert_eq!(c.event_count, 1);
    }

    #[test]
    fn test_rollup_weights_by_events() {
        let now = Utc::now();
        let rule = RuleId::new("r1");
        let contributions = vec![
            Contribution::rate(handle("a"), rule.clone(), 0.10, 300, now).unwrap(),
            Contribution::rate(handle("a"), rule.clone(), 0.30, 100, now).unwrap(),
        ];
        let rollup = RuleRollup::from_contributions(&contributions).unwrap();
        // (0.10*300 + 0.30*100) / 400 = 0.15
        assert!((rollup.fp_rate - 0.15).abs() < 1e-12);
        assert_eq!(rollup.event_count, 400);
    }

    #[test]
    fn test_rollup_zero_events_uses_plain_mean() {
        let now = Utc::now();
        let rule = RuleId::new("r1");
        let contributions = vec![
            Contribution::rate(handle("a"), rule.clone(), 0.2, 0, now).unwrap(),
            Contribution::rate(handle("a"), rule, 0.4, 0, now).unwrap(),
        ];
        let rollup = RuleRollup::from_contributions(&contributions).unwrap();
        assert!((rollup.fp_rate - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_rollup_keeps_latest_timestamp() {
        let now = Utc::now();
        let earlier = now - chrono::Duration::days(3);
        let rule = RuleId::new("r1");
        let contributions = vec![
            Contribution::rate(handle("a"), rule.clone(), 0.1, 10, now).unwrap(),
            Contribution::rate(handle("a"), rule, 0.2, 10, earlier).unwrap(),
        ];
        let rollup = RuleRollup::from_contributions(&contributions).unwrap();
        assert_eq!(rollup.latest_timestamp, now);
    }

    #[test]
    fn test_sample_identity() {
        let now = Utc::now();
        let sample = ConsistencySample {
            rule_id: RuleId::new("r1"),
            contributed: 0.1,
            consensus_at_time: 0.1,
            recorded_at: now,
        };
        let rescored = ConsistencySample {
            consensus_at_time: 0.3,
            ..sample.clone()
        };
        let other_rule = ConsistencySample {
            rule_id: RuleId::new("r2"),
            ..sample.clone()
        };
        assert!(sample.same_contribution(&rescored));
        assert!(!sample.same_contribution(&other_rule));
    }

    #[test]
    fn test_rollup_empty() {
        let empty: Vec<Contribution> = Vec::new();
        assert!(RuleRollup::from_contributions(&empty).is_none());
    }

    #[test]
    fn test_cold_start_defaults() {
        let rep = OrganizationReputation::new(handle("a"), Utc::now());
        assert_eq!(rep.base_reputation, DEFAULT_BASE_REPUTATION);
        assert_eq!(rep.consistency_score, NEUTRAL_CONSISTENCY);
        assert_eq!(rep.contribution_count, 0);
        assert!(rep.validate().is_ok());
    }

    #[test]
    fn test_reputation_validation() {
        let rep = OrganizationReputation::new(handle("a"), Utc::now()).with_stake(-1.0);
        assert!(matches!(
            rep.validate(),
            Err(TrustError::InvalidReputation { field: "stake_pledge", .. })
        ));
    }

    #[test]
    fn test_contribution_serialization_shape() {
        let c = Contribution::verdict(handle("org-7f"), RuleId::new("sig-1"), false, Utc::now());
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["org_handle"], "org-7f");
        assert_eq!(json["signal"]["is_false_positive"], false);

        let parsed: Contribution = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, c);
    }
}
