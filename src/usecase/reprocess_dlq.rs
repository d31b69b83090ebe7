use chrono::{DateTime, Utc};
use tracing::info;

use crate::error::{PipelineError, PipelineResult};
use crate::order::OrderId;
use crate::publisher::{EventPublisher, Staged};
use crate::store::{DlqRepository, OrderRepository, OutboxRepository, Store};

/// Reason recorded on an order put back to PENDING by an operator.
pub const REPROCESS_REASON: &str = "manual reprocess";

/// Take an order out of the DLQ and send it through the pipeline again.
#[derive(Clone)]
pub struct ReprocessDlqEntry<S> {
    store: S,
    publisher: EventPublisher,
}

impl<S: Store> ReprocessDlqEntry<S> {
    pub fn new(store: S, publisher: EventPublisher) -> Self {
        Self { store, publisher }
    }

    /// Delete the DLQ entry, reset the order to PENDING and re-announce it,
    /// all in `tx`.
    pub fn stage<Tx>(
        &self,
        tx: &mut Tx,
        order_id: OrderId,
        now: DateTime<Utc>,
    ) -> PipelineResult<Staged<()>>
    where
        Tx: OrderRepository + OutboxRepository + DlqRepository,
    {
        tx.find_dlq_by_order_id(order_id)?
            .ok_or(PipelineError::DlqEntryNotFound(order_id))?;
        let mut order = tx
            .lock_order(order_id)?
            .ok_or(PipelineError::OrderNotFound(order_id))?;

        // Another reprocess may have removed the entry while we waited on the
        // order lock.
        if !tx.delete_dlq_by_order_id(order_id)? {
            return Err(PipelineError::DlqEntryNotFound(order_id));
        }

        order.reset_to_pending(REPROCESS_REASON, now)?;
        tx.save_order(&order)?;
        let effect = self
            .publisher
            .publish_order_created(tx, order_id, None, now)?;

        info!(%order_id, retry_count = order.retry_count(), "order reprocessed from DLQ");
        Ok(Staged::new(()).with_effect(effect))
    }

    pub fn execute(&self, order_id: OrderId) -> PipelineResult<()> {
        let mut tx = self.store.begin()?;
        let staged = self.stage(&mut tx, order_id, Utc::now())?;
        self.publisher.commit_and_dispatch(tx, staged)
    }
}
