//! Configuration types for the calibration engine.
//!
//! One explicit struct, split into sections that map onto the component
//! configurations. Every field has a documented default and can be
//! overridden from a JSON file; missing fields fall back to the default.

use std::path::Path;

use fpcal_council::FilterConfig;
use fpcal_trust::{ConsistencyConfig, WeightingConfig};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Full engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Consistency Scorer settings.
    pub consistency: ConsistencyConfig,

    /// Weighting Engine settings.
    pub weighting: WeightingConfig,

    /// Byzantine Filter settings.
    pub filter: FilterConfig,

    /// K-Anonymity Guard settings.
    pub privacy: PrivacyConfig,
}

/// K-Anonymity Guard configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivacyConfig {
    /// Minimum distinct contributing organizations before any aggregate is released.
    pub k_anonymity_threshold: usize,
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        Self {
            k_anonymity_threshold: 10,
        }
    }
}

impl CalibrationConfig {
    /// Loads a configuration from a JSON file and validates it.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every option against its allowed range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let f = &self.filter;
        if !(0.0..1.0).contains(&f.byzantine_filter_percentile) {
            return Err(invalid("filter.byzantine_filter_percentile", "must be in [0, 1)"));
        }
        if !(f.z_score_threshold.is_finite() && f.z_score_threshold > 0.0) {
            return Err(invalid("filter.z_score_threshold", "must be a positive number"));
        }
        if !(0.0..=1.0).contains(&f.minimum_reputation_score) {
            return Err(invalid("filter.minimum_reputation_score", "must be in [0, 1]"));
        }

        let c = &self.consistency;
        if !(c.decay_rate.is_finite() && c.decay_rate >= 0.0) {
            return Err(invalid("consistency.decay_rate", "must be a non-negative number"));
        }
        if !(c.outlier_threshold > 0.0 && c.outlier_threshold <= 1.0) {
            return Err(invalid("consistency.outlier_threshold", "must be in (0, 1]"));
        }

        if !(0.0..=1.0).contains(&self.weighting.max_consistency_bonus) {
            return Err(invalid("weighting.max_consistency_bonus", "must be in [0, 1]"));
        }

        if self.privacy.k_anonymity_threshold == 0 {
            return Err(invalid("privacy.k_anonymity_threshold", "must be at least 1"));
        }

        Ok(())
    }
}

fn invalid(field: &'static str, reason: &'static str) -> ConfigError {
    ConfigError::Invalid { field, reason }
}
