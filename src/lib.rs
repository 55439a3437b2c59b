//! # dp-query: Gaussian queries for differentially private aggregation
//!
//! Clips per-record contributions (nested structures of `f32` arrays, such
//! as per-example gradients) to a global L2 norm, sums them, and releases
//! the sum with calibrated Gaussian noise.
//!
//! ## Queries
//!
//! - [`GaussianSumQuery`] - Noised sum of clipped records
//! - [`GaussianAverageQuery`] - Noised sum divided by a fixed denominator
//!
//! Both implement the [`DpQuery`] round lifecycle. [`SampleRound`] and
//! [`run_round()`] drive a round end to end.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use dp_query::{run_round, GaussianAverageQuery, InMemoryLedger, Nested};
//! use ndarray::array;
//!
//! let ledger = Arc::new(InMemoryLedger::new());
//! let query = GaussianAverageQuery::new(1.0, 0.0, 2.0)
//!     .unwrap()
//!     .with_ledger(ledger.clone());
//!
//! let records = vec![
//!     Nested::map([("w", Nested::leaf(array![0.6, 0.8]))]),
//!     Nested::map([("w", Nested::leaf(array![0.0, 0.5]))]),
//! ];
//!
//! let (avg, _) = run_round(&query, (), &records[0], &records).unwrap();
//! let w = avg.get("w").and_then(Nested::as_leaf).unwrap();
//! assert!((w[[1]] - 0.65).abs() < 1e-6);
//! assert_eq!(ledger.len(), 1);
//! ```

#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod ledger;
pub mod math;
pub mod nest;
pub mod query;

// Re-exports
pub use config::GaussianQueryConfig;
pub use error::QueryError;
pub use ledger::{InMemoryLedger, LedgerToken, PrivacyLedger, SumQueryEntry};
pub use nest::Nested;
pub use query::{run_round, DpQuery, SampleRound, SampleState};
pub use query::{GaussianAverageQuery, GaussianSumQuery};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Python bindings via PyO3
#[cfg(feature = "python")]
mod python {
    use ndarray::Array1;
    use numpy::{IntoPyArray, PyArray1};
    use pyo3::prelude::*;

    use crate::{run_round, GaussianAverageQuery, GaussianSumQuery, Nested, QueryError};

    fn query_err(e: QueryError) -> PyErr {
        PyErr::new::<pyo3::exceptions::PyValueError, _>(format!("{}", e))
    }

    fn to_records(records: &[numpy::PyReadonlyArray1<'_, f32>]) -> Vec<Nested> {
        records
            .iter()
            .map(|arr| Nested::leaf(arr.as_array().to_owned()))
            .collect()
    }

    fn to_vector(result: Nested) -> PyResult<Array1<f32>> {
        let leaf = result
            .into_leaves()
            .pop()
            .ok_or_else(|| PyErr::new::<pyo3::exceptions::PyValueError, _>("empty result"))?;
        leaf.into_dimensionality::<ndarray::Ix1>()
            .map_err(|e| query_err(e.into()))
    }

    #[pyclass(name = "GaussianSumQuery")]
    struct PyGaussianSumQuery {
        inner: GaussianSumQuery,
    }

    #[pymethods]
    impl PyGaussianSumQuery {
        #[new]
        #[pyo3(signature = (l2_norm_clip, stddev, seed=None))]
        fn new(l2_norm_clip: f32, stddev: f32, seed: Option<u64>) -> PyResult<Self> {
            let mut inner = GaussianSumQuery::new(l2_norm_clip, stddev).map_err(query_err)?;
            if let Some(seed) = seed {
                inner = inner.with_seed(seed);
            }
            Ok(Self { inner })
        }

        fn aggregate<'py>(
            &self,
            py: Python<'py>,
            records: Vec<numpy::PyReadonlyArray1<'py, f32>>,
        ) -> PyResult<&'py PyArray1<f32>> {
            let records = to_records(&records);
            let template = records.first().cloned().ok_or_else(|| {
                PyErr::new::<pyo3::exceptions::PyValueError, _>("no records provided")
            })?;
            let (sum, _) = run_round(&self.inner, (), &template, &records).map_err(query_err)?;
            Ok(to_vector(sum)?.into_pyarray(py))
        }
    }

    #[pyclass(name = "GaussianAverageQuery")]
    struct PyGaussianAverageQuery {
        inner: GaussianAverageQuery,
    }

    #[pymethods]
    impl PyGaussianAverageQuery {
        #[new]
        #[pyo3(signature = (l2_norm_clip, sum_stddev, denominator, seed=None))]
        fn new(
            l2_norm_clip: f32,
            sum_stddev: f32,
            denominator: f32,
            seed: Option<u64>,
        ) -> PyResult<Self> {
            let mut inner = GaussianAverageQuery::new(l2_norm_clip, sum_stddev, denominator)
                .map_err(query_err)?;
            if let Some(seed) = seed {
                inner = inner.with_seed(seed);
            }
            Ok(Self { inner })
        }

        fn aggregate<'py>(
            &self,
            py: Python<'py>,
            records: Vec<numpy::PyReadonlyArray1<'py, f32>>,
        ) -> PyResult<&'py PyArray1<f32>> {
            let records = to_records(&records);
            let template = records.first().cloned().ok_or_else(|| {
                PyErr::new::<pyo3::exceptions::PyValueError, _>("no records provided")
            })?;
            let (avg, _) = run_round(&self.inner, (), &template, &records).map_err(query_err)?;
            Ok(to_vector(avg)?.into_pyarray(py))
        }
    }

    #[pymodule]
    fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
        m.add_class::<PyGaussianSumQuery>()?;
        m.add_class::<PyGaussianAverageQuery>()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_config_drives_round_through_reexports() {
        let ledger = Arc::new(InMemoryLedger::new());
        let shared: Arc<dyn PrivacyLedger> = ledger.clone();
        let query = GaussianQueryConfig::new(1.0, 0.0)
            .with_denominator(2.0)
            .build_average_query(Some(shared))
            .unwrap();
        let records = vec![Nested::scalar(3.0), Nested::scalar(0.5)];

        let (avg, _) = run_round(&query, (), &records[0], &records).unwrap();

        assert_eq!(avg, Nested::scalar(0.75));
        assert_eq!(ledger.entries()[0].l2_norm_clip, 1.0);
    }
}
