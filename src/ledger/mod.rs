//! Privacy ledger hook.
//!
//! A ledger records the parameters each round actually applied so an
//! accountant can compose them later. The queries only ever call
//! [`PrivacyLedger::record_sum_query`], once per round, from
//! `initial_sample_state`, and wait for it to return before any record of
//! that round can be accumulated.
//!
//! - [`memory`] - Append-only in-memory ledger

pub mod memory;

pub use memory::InMemoryLedger;

use serde::{Deserialize, Serialize};

use crate::error::QueryError;

/// Completion token for a recorded round.
///
/// Only used for sequencing: holding one proves the record call returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LedgerToken {
    /// Position of the entry in the ledger (0-indexed).
    pub index: usize,
}

/// Parameters of one sum query as recorded in a ledger.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SumQueryEntry {
    /// Position of the entry in the ledger (0-indexed).
    pub index: usize,
    /// Clip norm bounding each record's global L2 norm.
    pub l2_norm_clip: f32,
    /// Standard deviation of the Gaussian noise added to the sum.
    pub stddev: f32,
}

/// Externally owned recorder of per-round privacy parameters.
///
/// Shared between queries behind an `Arc`; the queries never construct or
/// own one.
pub trait PrivacyLedger: Send + Sync {
    /// Record that a sum query with these parameters is being run.
    ///
    /// Must not return until the entry is durable.
    fn record_sum_query(&self, l2_norm_clip: f32, stddev: f32) -> Result<LedgerToken, QueryError>;
}
