use chrono::{DateTime, Utc};

use super::StoreError;
use crate::dlq::DlqEntry;
use crate::order::{Order, OrderId};
use crate::outbox::{EventId, OutboxBacklog, OutboxEvent};

/// Order rows.
pub trait OrderRepository {
    /// Insert or overwrite. Takes the row lock until the transaction ends.
    fn save_order(&mut self, order: &Order) -> Result<(), StoreError>;

    /// Plain read; sees this transaction's own writes.
    fn find_order(&mut self, id: OrderId) -> Result<Option<Order>, StoreError>;

    /// Read with an exclusive row lock, waiting for any other holder to
    /// finish first.
    fn lock_order(&mut self, id: OrderId) -> Result<Option<Order>, StoreError>;
}

/// Outbox rows and the claim protocol.
pub trait OutboxRepository {
    fn enqueue(&mut self, event: OutboxEvent) -> Result<(), StoreError>;

    /// Up to `limit` PENDING rows due at `now`, oldest first.
    ///
    /// Returned rows stay locked for the rest of the transaction. Rows locked
    /// by another open transaction are skipped rather than waited on, so
    /// concurrent claimants never receive the same row. Status is not
    /// changed; callers follow up with [`mark_processing`](Self::mark_processing).
    fn claim_ready(
        &mut self,
        limit: usize,
        now: DateTime<Utc>,
        claimant: &str,
    ) -> Result<Vec<OutboxEvent>, StoreError>;

    fn mark_processing(
        &mut self,
        id: EventId,
        locked_at: DateTime<Utc>,
        claimant: &str,
    ) -> Result<(), StoreError>;

    fn mark_processed(&mut self, id: EventId, processed_at: DateTime<Utc>)
        -> Result<(), StoreError>;

    /// Back to PENDING, due at `next_attempt_at`, with `attempts` incremented.
    fn reschedule(
        &mut self,
        id: EventId,
        next_attempt_at: DateTime<Utc>,
        last_error: &str,
    ) -> Result<(), StoreError>;

    fn mark_failed(
        &mut self,
        id: EventId,
        failed_at: DateTime<Utc>,
        last_error: &str,
    ) -> Result<(), StoreError>;

    /// Return PROCESSING rows locked before `older_than` to PENDING.
    /// Returns how many rows were released.
    fn release_stale_locks(&mut self, older_than: DateTime<Utc>) -> Result<usize, StoreError>;

    fn find_event(&mut self, id: EventId) -> Result<Option<OutboxEvent>, StoreError>;

    fn backlog(&mut self) -> Result<OutboxBacklog, StoreError>;
}

/// Dead-letter entries, one per order at most.
pub trait DlqRepository {
    fn save_dlq_entry(
        &mut self,
        order_id: OrderId,
        reason: &str,
        retry_count: u32,
        failed_at: DateTime<Utc>,
    ) -> Result<DlqEntry, StoreError>;

    /// Every entry, newest first.
    fn find_all_dlq(&mut self) -> Result<Vec<DlqEntry>, StoreError>;

    /// Newest first, with `limit` clamped to `1..=DLQ_LIST_MAX`.
    fn find_latest_dlq(&mut self, limit: usize) -> Result<Vec<DlqEntry>, StoreError>;

    fn find_dlq_by_order_id(&mut self, order_id: OrderId) -> Result<Option<DlqEntry>, StoreError>;

    /// Returns whether an entry existed.
    fn delete_dlq_by_order_id(&mut self, order_id: OrderId) -> Result<bool, StoreError>;
}

/// A unit of work over all three tables.
///
/// Writes become visible to other transactions only on [`commit`](Self::commit).
/// Dropping a transaction without committing rolls it back and releases
/// every row lock it holds.
pub trait Transaction: OrderRepository + OutboxRepository + DlqRepository {
    fn commit(self) -> Result<(), StoreError>;
}

/// Shared handle to the backing storage. Clones refer to the same data.
pub trait Store: Clone + Send + Sync + 'static {
    type Tx: Transaction;

    fn begin(&self) -> Result<Self::Tx, StoreError>;

    /// Run `f` in a fresh transaction, committing if it returns `Ok`.
    fn in_transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Self::Tx) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut tx = self.begin()?;
        let value = f(&mut tx)?;
        tx.commit()?;
        Ok(value)
    }
}
