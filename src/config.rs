//! Query configuration.
//!
//! Noise is configured as a multiplier of the clip norm, the usual DP-SGD
//! parameterization: `stddev = noise_multiplier * l2_norm_clip`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::QueryError;
use crate::ledger::PrivacyLedger;
use crate::query::{GaussianAverageQuery, GaussianSumQuery};

/// Serializable parameters for the Gaussian queries.
///
/// # Example
///
/// ```rust
/// use dp_query::GaussianQueryConfig;
///
/// let config = GaussianQueryConfig::from_json(
///     r#"{ "l2_norm_clip": 1.0, "noise_multiplier": 1.1, "denominator": 256.0 }"#,
/// )
/// .unwrap();
///
/// let query = config.build_average_query(None).unwrap();
/// assert!((query.sum_query().stddev() - 1.1).abs() < 1e-6);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GaussianQueryConfig {
    /// Bound on each record's global L2 norm.
    pub l2_norm_clip: f32,
    /// Noise standard deviation as a multiple of `l2_norm_clip`.
    ///
    /// Required; an explicit `0.0` disables noise.
    pub noise_multiplier: f32,
    /// Fixed denominator for the average query (expected records per round).
    #[serde(default)]
    pub denominator: Option<f32>,
    /// Seed for the noise stream; OS entropy when absent.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl GaussianQueryConfig {
    /// Configuration for a sum query.
    pub fn new(l2_norm_clip: f32, noise_multiplier: f32) -> Self {
        Self {
            l2_norm_clip,
            noise_multiplier,
            denominator: None,
            seed: None,
        }
    }

    /// Set the average query's denominator.
    pub fn with_denominator(mut self, denominator: f32) -> Self {
        self.denominator = Some(denominator);
        self
    }

    /// Fix the noise seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Parse a JSON configuration and validate it.
    pub fn from_json(json: &str) -> Result<Self, QueryError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| QueryError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Noise standard deviation of the sum.
    pub fn stddev(&self) -> f32 {
        self.noise_multiplier * self.l2_norm_clip
    }

    /// Check every field without building a query.
    pub fn validate(&self) -> Result<(), QueryError> {
        if !self.l2_norm_clip.is_finite() || self.l2_norm_clip < 0.0 {
            return Err(QueryError::InvalidConfig(format!(
                "l2_norm_clip must be finite and >= 0, got {}",
                self.l2_norm_clip
            )));
        }
        if !self.noise_multiplier.is_finite() || self.noise_multiplier < 0.0 {
            return Err(QueryError::InvalidConfig(format!(
                "noise_multiplier must be finite and >= 0, got {}",
                self.noise_multiplier
            )));
        }
        if let Some(d) = self.denominator {
            if !d.is_finite() || d <= 0.0 {
                return Err(QueryError::InvalidConfig(format!(
                    "denominator must be finite and > 0, got {}",
                    d
                )));
            }
        }
        Ok(())
    }

    /// Build a [`GaussianSumQuery`], optionally recording to `ledger`.
    pub fn build_sum_query(
        &self,
        ledger: Option<Arc<dyn PrivacyLedger>>,
    ) -> Result<GaussianSumQuery, QueryError> {
        self.validate()?;
        let mut query = GaussianSumQuery::new(self.l2_norm_clip, self.stddev())?;
        if let Some(seed) = self.seed {
            query = query.with_seed(seed);
        }
        if let Some(ledger) = ledger {
            query = query.with_ledger(ledger);
        }
        Ok(query)
    }

    /// Build a [`GaussianAverageQuery`]; requires `denominator`.
    pub fn build_average_query(
        &self,
        ledger: Option<Arc<dyn PrivacyLedger>>,
    ) -> Result<GaussianAverageQuery, QueryError> {
        let denominator = self.denominator.ok_or_else(|| {
            QueryError::InvalidConfig("average query needs a denominator".to_string())
        })?;
        GaussianAverageQuery::from_sum_query(self.build_sum_query(ledger)?, denominator)
    }
}
