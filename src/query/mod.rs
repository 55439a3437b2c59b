//! The DP query lifecycle and its Gaussian implementations.
//!
//! A query is driven round by round:
//!
//! 1. [`DpQuery::derive_sample_params`] from the current global state
//! 2. [`DpQuery::initial_sample_state`] creates a zeroed accumulator shaped
//!    like a record template (and records to the ledger, if any)
//! 3. [`DpQuery::accumulate_record`] folds records in, in any order
//! 4. [`DpQuery::get_noised_result`] releases the noised estimate and the
//!    global state for the next round
//!
//! [`SampleRound`] enforces that order and consumes the accumulator on
//! release.
//!
//! | Query | Estimate |
//! |-------|----------|
//! | [`GaussianSumQuery`] | clipped sum + `N(0, stddev^2)` |
//! | [`GaussianAverageQuery`] | noised sum / fixed denominator |

pub mod gaussian_average;
pub mod gaussian_sum;
pub mod round;

pub use gaussian_average::GaussianAverageQuery;
pub use gaussian_sum::GaussianSumQuery;
pub use round::{run_round, SampleRound};

use crate::error::QueryError;
use crate::nest::Nested;

/// Accumulator for one round; same structure as the records.
pub type SampleState = Nested;

/// A differentially private aggregation query.
///
/// Implementations hold only immutable configuration; all round state is
/// threaded through the method arguments.
pub trait DpQuery {
    /// State carried from one round to the next.
    type GlobalState;
    /// Per-round parameters derived from the global state.
    type SampleParams;

    /// State to use before the first round.
    fn initial_global_state(&self) -> Self::GlobalState;

    /// Parameters for the next round. Must not depend on anything but
    /// `global_state`.
    fn derive_sample_params(&self, global_state: &Self::GlobalState) -> Self::SampleParams;

    /// A zero accumulator shaped like `template`.
    ///
    /// Only the structure of `template` is used, never its values. Any
    /// side effect (ledger recording) has completed when this returns.
    fn initial_sample_state(
        &self,
        global_state: &Self::GlobalState,
        template: &Nested,
    ) -> Result<SampleState, QueryError>;

    /// Fold one record into the accumulator.
    fn accumulate_record(
        &self,
        params: &Self::SampleParams,
        sample_state: SampleState,
        record: &Nested,
    ) -> Result<SampleState, QueryError>;

    /// Combine two accumulators of the same round.
    ///
    /// Both sides may have started from `zeros_like` of the round's
    /// accumulator; this is what parallel folds rely on.
    fn merge_sample_states(
        &self,
        a: SampleState,
        b: SampleState,
    ) -> Result<SampleState, QueryError>;

    /// Release the noised estimate for the round.
    fn get_noised_result(
        &self,
        sample_state: SampleState,
        global_state: Self::GlobalState,
    ) -> Result<(Nested, Self::GlobalState), QueryError>;
}

pub(crate) fn check_non_negative(name: &str, value: f32) -> Result<f32, QueryError> {
    if !value.is_finite() || value < 0.0 {
        return Err(QueryError::InvalidConfig(format!(
            "{} must be finite and >= 0, got {}",
            name, value
        )));
    }
    Ok(value)
}
