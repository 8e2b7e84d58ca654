//! # Contributor Trust
//!
//! Data model, consistency scoring and weighting for the FP calibration
//! network. Every organization that reports a false-positive rate for a rule
//! is described here by an opaque handle, a reputation record and a
//! time-decayed history of how well its reports matched past consensus.
//!
//! ## Threat Model
//!
//! | Threat | Defense |
//! |--------|---------|
//! | Reporter drifts away from honest behavior | Time-decayed consistency score |
//! | Newcomer floods the network | Cold-start neutral score, minimal base reputation |
//! | Old good behavior masks recent abuse | Exponential decay, lookback horizon |
//! | Identity correlation | Opaque [`OrgHandle`] only |
//!
//! ## Usage
//!
//! ```rust
//! use chrono::Utc;
//! use fpcal_trust::{OrgHandle, OrganizationReputation, WeightingEngine};
//!
//! let engine = WeightingEngine::default();
//! let reputation = OrganizationReputation::new(OrgHandle::new("a1f3"), Utc::now())
//!     .with_base_reputation(0.8)
//!     .with_consistency(1.0);
//!
//! // 0.8 * (1 + 0) * (1 + 0.2)
//! let weight = engine.weight(&reputation, 0.0);
//! assert!((weight - 0.96).abs() < 1e-12);
//! ```

pub mod consistency;
pub mod models;
pub mod weighting;

pub use consistency::{contribution_consistency, ConsistencyConfig, ConsistencyReport, ConsistencyScorer};
pub use models::{
    ConsistencySample, Contribution, OrgHandle, OrganizationReputation, ReputationUpdate, Result,
    RuleId, RuleRollup, Signal, TrustError, DEFAULT_BASE_REPUTATION, NEUTRAL_CONSISTENCY,
};
pub use weighting::{LinearStake, NoStake, StakeOracle, WeightingConfig, WeightingEngine};
