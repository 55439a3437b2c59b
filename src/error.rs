//! Error types for dp-query

use thiserror::Error;

/// All possible errors in dp-query
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    /// A query was constructed with an invalid parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A record or sample state does not match the expected nested structure
    #[error("Structure mismatch at `{path}`: {detail}")]
    StructureMismatch {
        /// Leaf path where the mismatch was found (`$` is the root)
        path: String,
        /// What was expected versus what was found
        detail: String,
    },

    /// A record's global norm is NaN or infinite and cannot be clipped
    #[error("Record has non-finite global norm {0}")]
    NonFiniteNorm(f32),

    /// The privacy ledger failed to record the round's parameters
    #[error("Ledger error: {0}")]
    Ledger(String),

    /// An earlier accumulation in this round failed, the accumulator is gone
    #[error("Sample round aborted by an earlier accumulation failure")]
    RoundAborted,

    /// Array shape mismatch
    #[error("Array shape error: {0}")]
    ShapeError(String),
}

impl QueryError {
    pub(crate) fn mismatch(path: &str, detail: impl Into<String>) -> Self {
        QueryError::StructureMismatch {
            path: path.to_string(),
            detail: detail.into(),
        }
    }
}

impl From<ndarray::ShapeError> for QueryError {
    fn from(e: ndarray::ShapeError) -> Self {
        QueryError::ShapeError(e.to_string())
    }
}
