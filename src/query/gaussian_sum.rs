//! Gaussian sum query.
//!
//! Clips each record to a global L2 norm bound, sums the clipped records,
//! and adds independent `N(0, stddev^2)` noise to every element of the sum.
//!
//! Clipping is joint across all leaves of a record: the whole record is
//! treated as one vector, so `l2_norm_clip` bounds its total contribution
//! (the sensitivity the noise is calibrated to).

use std::fmt;
use std::sync::Arc;

use super::{check_non_negative, DpQuery, SampleState};
use crate::error::QueryError;
use crate::ledger::PrivacyLedger;
use crate::math::clip::clip_scale;
use crate::math::noise::GaussianNoise;
use crate::math::norms::global_l2_norm;
use crate::nest::Nested;

/// Noised sum of clipped records.
///
/// # Example
///
/// ```rust
/// use dp_query::{run_round, GaussianSumQuery, Nested};
/// use ndarray::array;
///
/// let query = GaussianSumQuery::new(1.0, 0.0).unwrap();
/// let records = vec![
///     Nested::leaf(array![0.3, 0.4]), // norm 0.5, kept as-is
///     Nested::leaf(array![3.0, 4.0]), // norm 5.0, scaled to norm 1.0
/// ];
///
/// let (sum, _) = run_round(&query, (), &records[0], &records).unwrap();
/// let sum = sum.as_leaf().unwrap();
/// assert!((sum[[0]] - 0.9).abs() < 1e-6);
/// assert!((sum[[1]] - 1.2).abs() < 1e-6);
/// ```
pub struct GaussianSumQuery {
    l2_norm_clip: f32,
    noise: GaussianNoise,
    ledger: Option<Arc<dyn PrivacyLedger>>,
}

impl GaussianSumQuery {
    /// Create a sum query.
    ///
    /// # Arguments
    ///
    /// * `l2_norm_clip` - Bound on each record's global L2 norm (>= 0)
    /// * `stddev` - Standard deviation of the noise added to the sum (>= 0)
    pub fn new(l2_norm_clip: f32, stddev: f32) -> Result<Self, QueryError> {
        let l2_norm_clip = check_non_negative("l2_norm_clip", l2_norm_clip)?;
        let stddev = check_non_negative("stddev", stddev)?;
        Ok(Self {
            l2_norm_clip,
            noise: GaussianNoise::new(stddev)?,
            ledger: None,
        })
    }

    /// Record every round's parameters to `ledger`.
    pub fn with_ledger(mut self, ledger: Arc<dyn PrivacyLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Draw noise from a stream seeded with `seed` instead of OS entropy.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.noise.reseed(seed);
        self
    }

    /// Clip norm applied to every record.
    pub fn l2_norm_clip(&self) -> f32 {
        self.l2_norm_clip
    }

    /// Standard deviation of the noise added to the sum.
    pub fn stddev(&self) -> f32 {
        self.noise.stddev()
    }

    /// Whether a ledger is attached.
    pub fn has_ledger(&self) -> bool {
        self.ledger.is_some()
    }

    /// Fold one record into the accumulator, also returning the record's
    /// global L2 norm before clipping.
    ///
    /// Callers that adapt the clip norm over time use the returned norm;
    /// [`DpQuery::accumulate_record`] discards it. The norm is measured in
    /// `f64` and saturates to `f32::INFINITY` on return if it exceeds
    /// `f32::MAX`; such a record is still clipped.
    pub fn accumulate_record_with_norm(
        &self,
        params: &f32,
        sample_state: SampleState,
        record: &Nested,
    ) -> Result<(SampleState, f32), QueryError> {
        let l2_norm_clip = *params;
        record.ensure_non_empty()?;

        let norm = global_l2_norm(&record.flatten());
        if !norm.is_finite() {
            return Err(QueryError::NonFiniteNorm(norm as f32));
        }
        let scale = clip_scale(norm, l2_norm_clip);
        tracing::trace!(norm, l2_norm_clip, scale, "accumulating record");

        let mut sample_state = sample_state;
        sample_state.add_scaled_nested(scale, record)?;
        Ok((sample_state, norm as f32))
    }
}

impl DpQuery for GaussianSumQuery {
    type GlobalState = ();
    type SampleParams = f32;

    fn initial_global_state(&self) -> Self::GlobalState {}

    fn derive_sample_params(&self, _global_state: &Self::GlobalState) -> Self::SampleParams {
        self.l2_norm_clip
    }

    fn initial_sample_state(
        &self,
        _global_state: &Self::GlobalState,
        template: &Nested,
    ) -> Result<SampleState, QueryError> {
        template.ensure_non_empty()?;
        if let Some(ledger) = &self.ledger {
            let token = ledger.record_sum_query(self.l2_norm_clip, self.stddev())?;
            tracing::debug!(
                entry = token.index,
                l2_norm_clip = self.l2_norm_clip,
                stddev = self.stddev(),
                "recorded sum query parameters"
            );
        }
        Ok(template.zeros_like())
    }

    fn accumulate_record(
        &self,
        params: &Self::SampleParams,
        sample_state: SampleState,
        record: &Nested,
    ) -> Result<SampleState, QueryError> {
        self.accumulate_record_with_norm(params, sample_state, record)
            .map(|(state, _)| state)
    }

    fn merge_sample_states(
        &self,
        mut a: SampleState,
        b: SampleState,
    ) -> Result<SampleState, QueryError> {
        a.add_assign_nested(&b)?;
        Ok(a)
    }

    fn get_noised_result(
        &self,
        sample_state: SampleState,
        global_state: Self::GlobalState,
    ) -> Result<(Nested, Self::GlobalState), QueryError> {
        let mut noised = sample_state;
        noised.for_each_leaf_mut(|leaf| self.noise.perturb(leaf));
        tracing::debug!(
            stddev = self.stddev(),
            elements = noised.element_count(),
            "released noised sum"
        );
        Ok((noised, global_state))
    }
}

impl fmt::Debug for GaussianSumQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GaussianSumQuery")
            .field("l2_norm_clip", &self.l2_norm_clip)
            .field("stddev", &self.stddev())
            .field("has_ledger", &self.has_ledger())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::InMemoryLedger;
    use ndarray::{array, ArrayD};
    use proptest::prelude::*;

    fn accumulate_one(query: &GaussianSumQuery, record: &Nested) -> (Nested, f32) {
        let state = query.initial_sample_state(&(), record).unwrap();
        query
            .accumulate_record_with_norm(&query.l2_norm_clip(), state, record)
            .unwrap()
    }

    #[test]
    fn test_rejects_negative_parameters() {
        assert!(matches!(
            GaussianSumQuery::new(-1.0, 1.0),
            Err(QueryError::InvalidConfig(_))
        ));
        assert!(matches!(
            GaussianSumQuery::new(1.0, -0.1),
            Err(QueryError::InvalidConfig(_))
        ));
        assert!(GaussianSumQuery::new(f32::INFINITY, 1.0).is_err());
        assert!(GaussianSumQuery::new(0.0, 0.0).is_ok());
    }

    #[test]
    fn test_params_ignore_global_state() {
        let query = GaussianSumQuery::new(2.5, 1.0).unwrap();
        let global = query.initial_global_state();
        assert_eq!(query.derive_sample_params(&global), 2.5);
    }

    #[test]
    fn test_initial_sample_state_is_zero() {
        let query = GaussianSumQuery::new(1.0, 1.0).unwrap();
        let template = Nested::leaf(array![4.0f32, -1.0, 7.0]);
        let state = query.initial_sample_state(&(), &template).unwrap();
        assert_eq!(state, Nested::leaf(array![0.0f32, 0.0, 0.0]));
    }

    #[test]
    fn test_empty_template_rejected() {
        let query = GaussianSumQuery::new(1.0, 1.0).unwrap();
        assert!(matches!(
            query.initial_sample_state(&(), &Nested::default()),
            Err(QueryError::StructureMismatch { .. })
        ));
    }

    #[test]
    fn test_scalar_records_clip_and_sum() {
        // Norms 3 and 4 are both clipped to 1.
        let query = GaussianSumQuery::new(1.0, 0.0).unwrap();
        let params = query.derive_sample_params(&());
        let mut state = query.initial_sample_state(&(), &Nested::scalar(0.0)).unwrap();
        state = query
            .accumulate_record(&params, state, &Nested::scalar(3.0))
            .unwrap();
        state = query
            .accumulate_record(&params, state, &Nested::scalar(4.0))
            .unwrap();
        let (result, _) = query.get_noised_result(state, ()).unwrap();
        assert_eq!(result, Nested::scalar(2.0));
    }

    #[test]
    fn test_record_within_bound_unscaled() {
        let query = GaussianSumQuery::new(5.0, 0.0).unwrap();
        let record = Nested::seq([
            Nested::leaf(array![1.0f32, 2.0]),
            Nested::leaf(array![[2.0f32]]),
        ]);
        let (state, norm) = accumulate_one(&query, &record);
        assert!((norm - 3.0).abs() < 1e-6);
        assert_eq!(state, record);
    }

    #[test]
    fn test_clipping_is_global_not_per_leaf() {
        // Each leaf alone has norm 3 or 4 (< 4.5), together 5 (> 4.5).
        let query = GaussianSumQuery::new(4.5, 0.0).unwrap();
        let record = Nested::map([
            ("a", Nested::leaf(array![3.0f32])),
            ("b", Nested::leaf(array![4.0f32])),
        ]);
        let (state, norm) = accumulate_one(&query, &record);
        assert!((norm - 5.0).abs() < 1e-6);

        let a = state.get("a").and_then(Nested::as_leaf).unwrap()[[0]];
        let b = state.get("b").and_then(Nested::as_leaf).unwrap()[[0]];
        assert!((a - 2.7).abs() < 1e-5);
        assert!((b - 3.6).abs() < 1e-5);
    }

    #[test]
    fn test_zero_record_no_division() {
        let query = GaussianSumQuery::new(0.0, 0.0).unwrap();
        let record = Nested::leaf(array![0.0f32, 0.0]);
        let (state, norm) = accumulate_one(&query, &record);
        assert_eq!(norm, 0.0);
        assert!(state.flatten()[0].iter().all(|x| x.is_finite() && *x == 0.0));
    }

    #[test]
    fn test_non_finite_record_rejected() {
        let query = GaussianSumQuery::new(1.0, 0.0).unwrap();
        let record = Nested::leaf(array![f32::NAN, 1.0]);
        let state = query.initial_sample_state(&(), &record).unwrap();
        assert!(matches!(
            query.accumulate_record(&1.0, state, &record),
            Err(QueryError::NonFiniteNorm(_))
        ));
    }

    #[test]
    fn test_huge_finite_record_clipped() {
        let query = GaussianSumQuery::new(1.0, 0.0).unwrap();
        let record = Nested::leaf(array![3.0e19f32, 4.0e19]);
        let (state, norm) = accumulate_one(&query, &record);

        assert!((norm / 5.0e19 - 1.0).abs() < 1e-6);
        let leaf = state.as_leaf().unwrap();
        assert!((leaf[[0]] - 0.6).abs() < 1e-6);
        assert!((leaf[[1]] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_structure_mismatch_names_leaf() {
        let query = GaussianSumQuery::new(1.0, 0.0).unwrap();
        let template = Nested::map([("w", Nested::leaf(array![0.0f32, 0.0]))]);
        let state = query.initial_sample_state(&(), &template).unwrap();
        let record = Nested::map([("w", Nested::leaf(array![1.0f32, 2.0, 3.0]))]);
        match query.accumulate_record(&1.0, state, &record) {
            Err(QueryError::StructureMismatch { path, .. }) => assert_eq!(path, "$.w"),
            other => panic!("expected structure mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_stddev_returns_state_unchanged() {
        let query = GaussianSumQuery::new(1.0, 0.0).unwrap();
        let state = Nested::seq([
            Nested::leaf(array![1.25f32, -3.5]),
            Nested::scalar(0.125),
        ]);
        let (result, ()) = query.get_noised_result(state.clone(), ()).unwrap();
        assert_eq!(result, state);
    }

    #[test]
    fn test_noise_applied_with_positive_stddev() {
        let query = GaussianSumQuery::new(1.0, 1.0).unwrap().with_seed(11);
        let state = Nested::leaf(ArrayD::<f32>::zeros(ndarray::IxDyn(&[1000])));
        let (result, _) = query.get_noised_result(state, ()).unwrap();
        let leaf = result.as_leaf().unwrap();
        let mean = leaf.sum() / 1000.0;
        let std = (leaf.iter().map(|x| (x - mean) * (x - mean)).sum::<f32>() / 1000.0).sqrt();
        assert!(mean.abs() < 0.15, "mean {}", mean);
        assert!((std - 1.0).abs() < 0.15, "std {}", std);
    }

    #[test]
    fn test_seeded_queries_reproduce() {
        let state = Nested::leaf(array![1.0f32, 2.0, 3.0]);
        let a = GaussianSumQuery::new(1.0, 2.0).unwrap().with_seed(5);
        let b = GaussianSumQuery::new(1.0, 2.0).unwrap().with_seed(5);
        let (x, _) = a.get_noised_result(state.clone(), ()).unwrap();
        let (y, _) = b.get_noised_result(state, ()).unwrap();
        assert_eq!(x, y);
    }

    #[test]
    fn test_ledger_recorded_once_per_round() {
        let ledger = Arc::new(InMemoryLedger::new());
        let query = GaussianSumQuery::new(1.5, 0.75)
            .unwrap()
            .with_ledger(ledger.clone());
        let template = Nested::leaf(array![0.0f32, 0.0]);

        for round in 0..3 {
            let params = query.derive_sample_params(&());
            let mut state = query.initial_sample_state(&(), &template).unwrap();
            assert_eq!(ledger.len(), round + 1);
            for _ in 0..4 {
                state = query
                    .accumulate_record(&params, state, &Nested::leaf(array![1.0f32, 1.0]))
                    .unwrap();
            }
            query.get_noised_result(state, ()).unwrap();
            assert_eq!(ledger.len(), round + 1);

            let entry = &ledger.entries()[round];
            assert_eq!(entry.l2_norm_clip, params);
            assert_eq!(entry.stddev, 0.75);
        }
    }

    #[test]
    fn test_merge_sums_states() {
        let query = GaussianSumQuery::new(1.0, 0.0).unwrap();
        let merged = query
            .merge_sample_states(
                Nested::leaf(array![1.0f32, 2.0]),
                Nested::leaf(array![0.5f32, 0.5]),
            )
            .unwrap();
        assert_eq!(merged, Nested::leaf(array![1.5f32, 2.5]));
    }

    fn record_strategy() -> impl Strategy<Value = Nested> {
        (
            prop::collection::vec(-50.0f32..50.0, 3),
            prop::collection::vec(-50.0f32..50.0, 2),
        )
            .prop_map(|(a, b)| {
                Nested::map([
                    ("kernel", Nested::leaf(ndarray::Array1::from(a))),
                    ("bias", Nested::leaf(ndarray::Array1::from(b))),
                ])
            })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_clipped_norm_bounded(record in record_strategy(), clip in 0.1f32..20.0) {
            let query = GaussianSumQuery::new(clip, 0.0).unwrap();
            let (state, norm) = accumulate_one(&query, &record);
            let clipped_norm = global_l2_norm(&state.flatten()) as f32;
            if norm <= clip {
                prop_assert_eq!(state, record);
            } else {
                prop_assert!((clipped_norm - clip).abs() <= 1e-4 * clip.max(1.0));
                // Direction kept: every element scaled by the same factor.
                let scale = clip / norm;
                for (c, r) in state.flatten().iter().zip(record.flatten()) {
                    for (x, y) in c.iter().zip(r.iter()) {
                        prop_assert!((x - y * scale).abs() <= 1e-4);
                    }
                }
            }
        }

        #[test]
        fn prop_accumulation_order_independent(
            a in record_strategy(),
            b in record_strategy(),
            clip in 0.1f32..20.0,
        ) {
            let query = GaussianSumQuery::new(clip, 0.0).unwrap();
            let params = query.derive_sample_params(&());

            let s = query.initial_sample_state(&(), &a).unwrap();
            let s = query.accumulate_record(&params, s, &a).unwrap();
            let ab = query.accumulate_record(&params, s, &b).unwrap();

            let s = query.initial_sample_state(&(), &a).unwrap();
            let s = query.accumulate_record(&params, s, &b).unwrap();
            let ba = query.accumulate_record(&params, s, &a).unwrap();

            for (x, y) in ab.flatten().iter().zip(ba.flatten()) {
                for (p, q) in x.iter().zip(y.iter()) {
                    prop_assert!((p - q).abs() <= 1e-4 * p.abs().max(1.0));
                }
            }
        }
    }
}
