use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::order::{OrderId, OrderStatus, UNKNOWN_REASON};
use crate::processor::OrderProcessor;
use crate::store::{DlqRepository, OrderRepository, Store};

/// What happened to an order on one processing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Done. Acknowledge the signal.
    Processed,
    /// Back to PENDING; the signal should be retried after a backoff.
    Retry,
    /// Terminal. Do not retry automatically.
    Failed,
}

/// Drive one processing attempt for an order.
///
/// The order row stays locked for the whole attempt, processor call
/// included, so two consumers holding duplicate signals for the same order
/// run one after the other and the second sees the first one's outcome.
pub struct ProcessOrder<S> {
    store: S,
    processor: Arc<dyn OrderProcessor>,
}

impl<S: Clone> Clone for ProcessOrder<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            processor: Arc::clone(&self.processor),
        }
    }
}

impl<S: Store> ProcessOrder<S> {
    pub fn new(store: S, processor: Arc<dyn OrderProcessor>) -> Self {
        Self { store, processor }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run one attempt in its own transaction.
    pub fn execute(&self, order_id: OrderId, max_retries: u32) -> PipelineResult<ProcessOutcome> {
        self.store
            .in_transaction(|tx| self.execute_in(tx, order_id, Utc::now(), max_retries))
    }

    /// Run one attempt inside `tx`. Nothing is visible until the caller
    /// commits.
    pub fn execute_in<Tx>(
        &self,
        tx: &mut Tx,
        order_id: OrderId,
        now: DateTime<Utc>,
        max_retries: u32,
    ) -> PipelineResult<ProcessOutcome>
    where
        Tx: OrderRepository + DlqRepository,
    {
        let mut order = tx
            .lock_order(order_id)?
            .ok_or(PipelineError::OrderNotFound(order_id))?;

        match order.status() {
            OrderStatus::Pending => {}
            OrderStatus::Processed => {
                warn!(%order_id, "order already processed, acknowledging duplicate signal");
                return Ok(ProcessOutcome::Processed);
            }
            status => {
                warn!(%order_id, %status, "order is not pending, skipping");
                return Ok(ProcessOutcome::Failed);
            }
        }

        order.mark_processing(now)?;
        tx.save_order(&order)?;

        let failure = match self.processor.process(order_id) {
            Ok(()) => {
                order.mark_processed(now)?;
                tx.save_order(&order)?;
                info!(%order_id, "order processed");
                return Ok(ProcessOutcome::Processed);
            }
            Err(failure) => failure,
        };

        if order.status() != OrderStatus::Processing {
            warn!(%order_id, status = %order.status(), "order left PROCESSING during the attempt");
            return Ok(ProcessOutcome::Failed);
        }

        let will_exceed = order.retry_count().saturating_add(1) >= max_retries;
        if !will_exceed {
            order.mark_retryable_failure(failure.reason(), now)?;
            tx.save_order(&order)?;
            warn!(
                %order_id,
                retry_count = order.retry_count(),
                max_retries,
                reason = failure.reason(),
                "order processing failed, will retry"
            );
            return Ok(ProcessOutcome::Retry);
        }

        order.mark_failed(failure.reason(), now)?;
        tx.save_order(&order)?;
        let reason = order.failure_reason().unwrap_or(UNKNOWN_REASON);
        tx.save_dlq_entry(order_id, reason, order.retry_count(), now)?;
        error!(
            %order_id,
            retry_count = order.retry_count(),
            reason,
            "order processing failed permanently, moved to DLQ"
        );
        Ok(ProcessOutcome::Failed)
    }
}
