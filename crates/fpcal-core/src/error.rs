//! Error types for the calibration engine.

use fpcal_store::StoreError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Privacy refusal: too few distinct organizations contributed.
///
/// Returned instead of a consensus, never alongside one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("k-anonymity not satisfied: {actual_k} distinct contributors, {required_k} required")]
pub struct KAnonymityError {
    /// Configured threshold.
    pub required_k: usize,
    /// Distinct organizations that contributed.
    pub actual_k: usize,
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid JSON for this schema.
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// An option is out of range.
    #[error("Invalid configuration value for {field}: {reason}")]
    Invalid {
        /// Dotted option path.
        field: &'static str,
        /// What the value must satisfy.
        reason: &'static str,
    },
}

/// Engine error type.
#[derive(Debug, Error)]
pub enum CalibrationError {
    /// The k-anonymity gate refused to release an aggregate.
    #[error(transparent)]
    KAnonymity(#[from] KAnonymityError),

    /// The store failed; passed through unchanged.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The engine configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl CalibrationError {
    /// The privacy refusal, if this is one.
    pub fn as_k_anonymity(&self) -> Option<&KAnonymityError> {
        match self {
            Self::KAnonymity(err) => Some(err),
            _ => None,
        }
    }
}
