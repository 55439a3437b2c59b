//! Gaussian noise source for the Gaussian mechanism.
//!
//! A single ChaCha20 stream shared by every leaf the query perturbs. Seed
//! it for reproducible runs; by default it is seeded from OS entropy.

use std::fmt;
use std::sync::Mutex;

use ndarray::ArrayD;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use rand_distr::{Distribution, Normal};

use crate::error::QueryError;

/// Elementwise `N(0, stddev^2)` noise generator.
pub struct GaussianNoise {
    stddev: f32,
    // None when stddev == 0: no draws are made and inputs pass through exactly.
    normal: Option<Normal<f32>>,
    rng: Mutex<ChaCha20Rng>,
}

impl GaussianNoise {
    /// Create a noise source seeded from OS entropy.
    pub fn new(stddev: f32) -> Result<Self, QueryError> {
        Self::with_rng(stddev, ChaCha20Rng::from_entropy())
    }

    /// Create a noise source with a fixed seed.
    pub fn seeded(stddev: f32, seed: u64) -> Result<Self, QueryError> {
        Self::with_rng(stddev, ChaCha20Rng::seed_from_u64(seed))
    }

    fn with_rng(stddev: f32, rng: ChaCha20Rng) -> Result<Self, QueryError> {
        if !stddev.is_finite() || stddev < 0.0 {
            return Err(QueryError::InvalidConfig(format!(
                "stddev must be finite and >= 0, got {}",
                stddev
            )));
        }
        let normal = if stddev > 0.0 {
            Some(
                Normal::new(0.0f32, stddev)
                    .map_err(|e| QueryError::InvalidConfig(e.to_string()))?,
            )
        } else {
            None
        };
        Ok(Self {
            stddev,
            normal,
            rng: Mutex::new(rng),
        })
    }

    /// Restart the stream from `seed`.
    pub fn reseed(&mut self, seed: u64) {
        self.rng = Mutex::new(ChaCha20Rng::seed_from_u64(seed));
    }

    /// Standard deviation of each draw.
    pub fn stddev(&self) -> f32 {
        self.stddev
    }

    /// Add independent noise to every element of `leaf` in place.
    pub fn perturb(&self, leaf: &mut ArrayD<f32>) {
        let Some(normal) = &self.normal else {
            return;
        };
        // A panic while holding the lock leaves the stream intact.
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        leaf.map_inplace(|x| *x += normal.sample(&mut *rng));
    }
}

impl fmt::Debug for GaussianNoise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GaussianNoise")
            .field("stddev", &self.stddev)
            .finish_non_exhaustive()
    }
}
