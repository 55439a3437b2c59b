//! Append-only in-memory privacy ledger.
//!
//! Keeps every recorded sum query in order, for tests and for handing off
//! to an external accountant as JSON.

use std::sync::{Mutex, MutexGuard};

use super::{LedgerToken, PrivacyLedger, SumQueryEntry};
use crate::error::QueryError;

/// In-memory [`PrivacyLedger`].
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    entries: Mutex<Vec<SumQueryEntry>>,
}

impl InMemoryLedger {
    /// Create a new, empty ledger.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<SumQueryEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Snapshot of all entries in recording order.
    pub fn entries(&self) -> Vec<SumQueryEntry> {
        self.lock().clone()
    }

    /// Number of recorded rounds.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Serialize the ledger to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&*self.lock())
    }
}

impl PrivacyLedger for InMemoryLedger {
    fn record_sum_query(&self, l2_norm_clip: f32, stddev: f32) -> Result<LedgerToken, QueryError> {
        let mut entries = self.lock();
        let index = entries.len();
        entries.push(SumQueryEntry {
            index,
            l2_norm_clip,
            stddev,
        });
        tracing::trace!(index, "appended ledger entry");
        Ok(LedgerToken { index })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_len() {
        let ledger = InMemoryLedger::new();
        assert!(ledger.is_empty());

        let token = ledger.record_sum_query(1.0, 0.5).unwrap();

        assert_eq!(token.index, 0);
        assert_eq!(ledger.len(), 1);
        assert!(!ledger.is_empty());
        assert_eq!(ledger.entries()[0].l2_norm_clip, 1.0);
        assert_eq!(ledger.entries()[0].stddev, 0.5);
    }

    #[test]
    fn test_tokens_follow_recording_order() {
        let ledger = InMemoryLedger::new();
        for i in 0..5 {
            let token = ledger.record_sum_query(1.0, i as f32).unwrap();
            assert_eq!(token.index, i);
        }
        assert_eq!(ledger.len(), 5);
        assert_eq!(ledger.entries()[4].stddev, 4.0);
    }

    #[test]
    fn test_ledger_json() {
        let ledger = InMemoryLedger::new();
        ledger.record_sum_query(2.0, 1.5).unwrap();
        let json = ledger.to_json().unwrap();
        let restored: Vec<SumQueryEntry> = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, ledger.entries());
    }
}
