//! # Calibration Council
//!
//! Byzantine-tolerant filtering and weighted consensus over the FP rates that
//! organizations report for one rule.
//!
//! ## Overview
//!
//! Reports arrive already weighted (see `fpcal-trust`). The council removes
//! contributors that cannot be trusted for this round and averages the rest:
//!
//! ```text
//! ┌────────────────────┐     ┌──────────────────┐     ┌─────────────────────┐
//! │ WeightedContributor│ ──▶ │ ByzantineFilter  │ ──▶ │ ConsensusCalculator │
//! │   (one per org)    │     │  (five stages)   │     │ (rate + confidence) │
//! └────────────────────┘     └────────┬─────────┘     └─────────────────────┘
//!                                     │
//!                                     ▼
//!                            FilterDecision list
//! ```
//!
//! ## Threat Model
//!
//! | Threat | Stage |
//! |--------|-------|
//! | Unregistered reporter | Missing weight |
//! | Sybil swarm of fresh identities | Minimum reputation, percentile |
//! | Single extreme report in a large population | Z-score outlier |
//! | Free-riding reporters (staking deployments) | Stake requirement |
//!
//! A minority of attackers that stays within the statistical envelope is not
//! removed, only down-weighted. The result tolerates a bounded fraction of
//! faulty participants, not an arbitrary one.
//!
//! ## Usage
//!
//! ```rust
//! use fpcal_council::{ByzantineFilter, ConsensusCalculator, WeightedContributor};
//! use fpcal_trust::OrgHandle;
//!
//! let contributors: Vec<_> = (0..6)
//!     .map(|i| WeightedContributor {
//!         org_handle: OrgHandle::new(format!("org{}", i)),
//!         fp_rate: 0.1,
//!         weight: Some(1.0),
//!         stake_pledge: 0.0,
//!         event_count: 200,
//!     })
//!     .collect();
//!
//! let outcome = ByzantineFilter::default().apply(contributors);
//! let estimate = ConsensusCalculator::new().compute(&outcome.trusted);
//! assert_eq!(outcome.trusted.len(), 5);
//! assert!((estimate.fp_rate - 0.1).abs() < 1e-12);
//! ```
//!
//! ## References
//!
//! - [Byzantine Fault Tolerance](https://en.wikipedia.org/wiki/Byzantine_fault)
//! - [Standard score](https://en.wikipedia.org/wiki/Standard_score)

pub mod consensus;
pub mod filter;
pub mod stats;

pub use consensus::{
    Confidence, ConfidenceCategory, ConfidenceFactors, ConsensusCalculator, ConsensusEstimate,
};
pub use filter::{
    percentile_drop_count, ByzantineFilter, FilterConfig, FilterDecision, FilterOutcome,
    FilterStage, FilteringSummary, TrustedContributor, WeightedContributor,
};
