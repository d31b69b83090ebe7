use crate::dlq::DlqEntry;
use crate::error::PipelineResult;
use crate::store::{DlqRepository, Store};

/// Newest dead-letter entries first. The limit is clamped to
/// `1..=DLQ_LIST_MAX`; an out-of-range limit is never an error.
#[derive(Clone)]
pub struct ListDlqEntries<S> {
    store: S,
}

impl<S: Store> ListDlqEntries<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn execute(&self, limit: usize) -> PipelineResult<Vec<DlqEntry>> {
        self.store
            .in_transaction(|tx| Ok(tx.find_latest_dlq(limit)?))
    }
}
