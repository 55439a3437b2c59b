//! One processing round of a [`DpQuery`].
//!
//! `begin` derives the params and creates the accumulator (ledger recording
//! happens there, before any record can be folded in). `release` consumes
//! the round, so a released accumulator cannot be touched again.

use rayon::prelude::*;

use super::{DpQuery, SampleState};
use crate::error::QueryError;
use crate::nest::Nested;

/// A round in the `Accumulating` state.
///
/// # Example
///
/// ```rust
/// use dp_query::{GaussianSumQuery, DpQuery, Nested, SampleRound};
///
/// let query = GaussianSumQuery::new(1.0, 0.0).unwrap();
/// let global = query.initial_global_state();
///
/// let mut round = SampleRound::begin(&query, &global, &Nested::scalar(0.0)).unwrap();
/// round.accumulate(&Nested::scalar(3.0)).unwrap();
/// round.accumulate(&Nested::scalar(4.0)).unwrap();
///
/// let (sum, _) = round.release(global).unwrap();
/// assert_eq!(sum, Nested::scalar(2.0));
/// ```
pub struct SampleRound<'q, Q: DpQuery> {
    query: &'q Q,
    params: Q::SampleParams,
    // None once an accumulation failed: the state was consumed.
    state: Option<SampleState>,
    accumulated: usize,
}

impl<'q, Q: DpQuery> SampleRound<'q, Q> {
    /// Derive params and initialize a zero accumulator shaped like `template`.
    pub fn begin(
        query: &'q Q,
        global_state: &Q::GlobalState,
        template: &Nested,
    ) -> Result<Self, QueryError> {
        let params = query.derive_sample_params(global_state);
        let state = query.initial_sample_state(global_state, template)?;
        Ok(Self {
            query,
            params,
            state: Some(state),
            accumulated: 0,
        })
    }

    /// Parameters in force for this round.
    pub fn params(&self) -> &Q::SampleParams {
        &self.params
    }

    /// Number of records folded in so far.
    pub fn accumulated(&self) -> usize {
        self.accumulated
    }

    /// Whether an earlier failure aborted this round.
    pub fn is_aborted(&self) -> bool {
        self.state.is_none()
    }

    /// Fold one record into the accumulator.
    ///
    /// A failure aborts the round; every later call returns
    /// [`QueryError::RoundAborted`].
    pub fn accumulate(&mut self, record: &Nested) -> Result<(), QueryError> {
        let state = self.state.take().ok_or(QueryError::RoundAborted)?;
        match self.query.accumulate_record(&self.params, state, record) {
            Ok(state) => {
                self.state = Some(state);
                self.accumulated += 1;
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, accumulated = self.accumulated, "sample round aborted");
                Err(e)
            }
        }
    }

    /// Fold records one at a time, in iteration order.
    pub fn accumulate_all<'r, I>(&mut self, records: I) -> Result<(), QueryError>
    where
        I: IntoIterator<Item = &'r Nested>,
    {
        records.into_iter().try_for_each(|record| self.accumulate(record))
    }

    /// Release the noised estimate and the next global state.
    pub fn release(
        self,
        global_state: Q::GlobalState,
    ) -> Result<(Nested, Q::GlobalState), QueryError> {
        let state = self.state.ok_or(QueryError::RoundAborted)?;
        self.query.get_noised_result(state, global_state)
    }
}

impl<'q, Q> SampleRound<'q, Q>
where
    Q: DpQuery + Sync,
    Q::SampleParams: Sync,
{
    /// Fold records in parallel.
    ///
    /// Each worker accumulates into its own zero accumulator; partial sums
    /// are combined with [`DpQuery::merge_sample_states`].
    pub fn accumulate_par(&mut self, records: &[Nested]) -> Result<(), QueryError> {
        let state = self.state.take().ok_or(QueryError::RoundAborted)?;
        let zero = state.zeros_like();
        let query = self.query;
        let params = &self.params;

        let merged = records
            .par_iter()
            .try_fold(
                || zero.clone(),
                |acc, record| query.accumulate_record(params, acc, record),
            )
            .try_reduce(|| zero.clone(), |a, b| query.merge_sample_states(a, b))
            .and_then(|partial| query.merge_sample_states(state, partial));

        match merged {
            Ok(state) => {
                self.state = Some(state);
                self.accumulated += records.len();
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, accumulated = self.accumulated, "sample round aborted");
                Err(e)
            }
        }
    }
}

/// Run one whole round: begin, fold `records` in order, release.
pub fn run_round<Q: DpQuery>(
    query: &Q,
    global_state: Q::GlobalState,
    template: &Nested,
    records: &[Nested],
) -> Result<(Nested, Q::GlobalState), QueryError> {
    let mut round = SampleRound::begin(query, &global_state, template)?;
    round.accumulate_all(records)?;
    round.release(global_state)
}
