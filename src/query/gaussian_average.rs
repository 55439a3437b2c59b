//! Gaussian average query (fixed-denominator estimator).
//!
//! Wraps a [`GaussianSumQuery`] and divides the noised sum by a constant
//! denominator, normally the expected number of records per round. The
//! actual number of accumulated records is never used: counting it would
//! need its own noise and gives a higher-variance estimator.

use std::sync::Arc;

use super::{DpQuery, GaussianSumQuery, SampleState};
use crate::error::QueryError;
use crate::ledger::PrivacyLedger;
use crate::nest::Nested;

/// Noised average of clipped records.
///
/// # Example
///
/// ```rust
/// use dp_query::{run_round, GaussianAverageQuery, Nested};
/// use ndarray::array;
///
/// // Expect 4 records per round; only 2 show up.
/// let query = GaussianAverageQuery::new(10.0, 0.0, 4.0).unwrap();
/// let records = vec![Nested::leaf(array![2.0, 4.0]), Nested::leaf(array![2.0, 0.0])];
///
/// let (avg, _) = run_round(&query, (), &records[0], &records).unwrap();
/// assert_eq!(avg, Nested::leaf(array![1.0, 1.0]));
/// ```
#[derive(Debug)]
pub struct GaussianAverageQuery {
    numerator: GaussianSumQuery,
    denominator: f32,
}

impl GaussianAverageQuery {
    /// Create an average query.
    ///
    /// # Arguments
    ///
    /// * `l2_norm_clip` - Bound on each record's global L2 norm (>= 0)
    /// * `sum_stddev` - Standard deviation of the noise added to the sum, before normalization (>= 0)
    /// * `denominator` - Normalization constant applied after noising (> 0)
    pub fn new(l2_norm_clip: f32, sum_stddev: f32, denominator: f32) -> Result<Self, QueryError> {
        Self::from_sum_query(GaussianSumQuery::new(l2_norm_clip, sum_stddev)?, denominator)
    }

    /// Normalize an existing sum query by `denominator`.
    pub fn from_sum_query(
        numerator: GaussianSumQuery,
        denominator: f32,
    ) -> Result<Self, QueryError> {
        if !denominator.is_finite() || denominator <= 0.0 {
            return Err(QueryError::InvalidConfig(format!(
                "denominator must be finite and > 0, got {}",
                denominator
            )));
        }
        Ok(Self {
            numerator,
            denominator,
        })
    }

    /// Record every round's parameters to `ledger`.
    pub fn with_ledger(mut self, ledger: Arc<dyn PrivacyLedger>) -> Self {
        self.numerator = self.numerator.with_ledger(ledger);
        self
    }

    /// Draw noise from a stream seeded with `seed` instead of OS entropy.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.numerator = self.numerator.with_seed(seed);
        self
    }

    /// The fixed normalization constant.
    pub fn denominator(&self) -> f32 {
        self.denominator
    }

    /// The wrapped sum query.
    pub fn sum_query(&self) -> &GaussianSumQuery {
        &self.numerator
    }
}

impl DpQuery for GaussianAverageQuery {
    type GlobalState = <GaussianSumQuery as DpQuery>::GlobalState;
    type SampleParams = <GaussianSumQuery as DpQuery>::SampleParams;

    fn initial_global_state(&self) -> Self::GlobalState {
        self.numerator.initial_global_state()
    }

    fn derive_sample_params(&self, global_state: &Self::GlobalState) -> Self::SampleParams {
        self.numerator.derive_sample_params(global_state)
    }

    fn initial_sample_state(
        &self,
        global_state: &Self::GlobalState,
        template: &Nested,
    ) -> Result<SampleState, QueryError> {
        self.numerator.initial_sample_state(global_state, template)
    }

    fn accumulate_record(
        &self,
        params: &Self::SampleParams,
        sample_state: SampleState,
        record: &Nested,
    ) -> Result<SampleState, QueryError> {
        self.numerator.accumulate_record(params, sample_state, record)
    }

    fn merge_sample_states(
        &self,
        a: SampleState,
        b: SampleState,
    ) -> Result<SampleState, QueryError> {
        self.numerator.merge_sample_states(a, b)
    }

    fn get_noised_result(
        &self,
        sample_state: SampleState,
        global_state: Self::GlobalState,
    ) -> Result<(Nested, Self::GlobalState), QueryError> {
        let (noised_sum, global_state) =
            self.numerator.get_noised_result(sample_state, global_state)?;
        Ok((noised_sum.div_scalar(self.denominator), global_state))
    }
}
