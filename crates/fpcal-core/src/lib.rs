//! # fpcal Core
//!
//! Byzantine-tolerant, k-anonymous false-positive rate calibration.
//! Combines per-organization FP reports for a shared rule into one
//! consensus that a dishonest minority cannot skew and that never exposes
//! an individual organization's data.
//!
//! ## Threat Coverage
//!
//! | Layer | Component | Threats Mitigated |
//! |-------|-----------|-------------------|
//! | Privacy | K-Anonymity Guard | Re-identification from small aggregates |
//! | Trust | Consistency Scorer + Weighting | Chronic misreporters, fresh sybils |
//! | Filtering | Byzantine Filter | Extreme liars, low-trust swarms |
//! | Consensus | Weighted Consensus | Residual noise, with a confidence estimate |
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     CALIBRATION ENGINE                          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │   store ──▶ K-Anonymity Guard ──▶ Consistency ──▶ Weighting     │
//! │                  │                                   │          │
//! │                  ▼                                   ▼          │
//! │          KAnonymityError              Byzantine Filter (5)      │
//! │                                                      │          │
//! │                                                      ▼          │
//! │                                        Weighted Consensus       │
//! │                                                      │          │
//! │                                                      ▼          │
//! │                            ConsensusResult + reputation updates │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fpcal_core::{CalibrationConfig, CalibrationEngine};
//! use fpcal_store::SledStore;
//!
//! let engine = CalibrationEngine::new(CalibrationConfig::default(), SledStore::open("./fpcal.db")?)?;
//! match engine.aggregate(&rule_id) {
//!     Ok(round) => publish(&round.result),
//!     Err(err) if err.as_k_anonymity().is_some() => wait_for_more_reports(),
//!     Err(err) => return Err(err.into()),
//! }
//! ```
//!
//! ## Guarantees
//!
//! - A [`ConsensusResult`] and a [`KAnonymityError`] are mutually exclusive
//! - A `ConsensusResult` can only be built after the guard has passed
//! - The consensus lies within the range of the trusted rates
//! - Identical snapshots produce identical results
//! - Store failures propagate; they are never read as empty data

mod config;
mod engine;
mod error;
mod guard;
mod pipeline;

pub use config::{CalibrationConfig, PrivacyConfig};
pub use engine::CalibrationEngine;
pub use error::{CalibrationError, ConfigError, KAnonymityError};
pub use guard::{AdmittedSet, KAnonymityGuard};
pub use pipeline::{calibrate, CalibrationRound, ConsensusResult, RoundSnapshot};

// Re-export component types for convenience
pub use fpcal_council::{
    ConfidenceCategory, FilterConfig, FilterDecision, FilterStage, FilteringSummary,
};
pub use fpcal_trust::{
    ConsistencyConfig, Contribution, LinearStake, NoStake, OrgHandle, OrganizationReputation,
    RuleId, Signal, StakeOracle, WeightingConfig,
};

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, CalibrationError>;
