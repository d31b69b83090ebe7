use chrono::{DateTime, Utc};
use tracing::info;

use crate::error::PipelineResult;
use crate::order::{Order, OrderId};
use crate::publisher::{EventPublisher, Staged};
use crate::store::{OrderRepository, OutboxRepository, Store};

/// Accept a new order and announce it.
#[derive(Clone)]
pub struct CreateOrder<S> {
    store: S,
    publisher: EventPublisher,
}

impl<S: Store> CreateOrder<S> {
    pub fn new(store: S, publisher: EventPublisher) -> Self {
        Self { store, publisher }
    }

    /// Write a PENDING order (and, in outbox mode, its outbox row) into `tx`.
    pub fn stage<Tx>(
        &self,
        tx: &mut Tx,
        correlation_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> PipelineResult<Staged<OrderId>>
    where
        Tx: OrderRepository + OutboxRepository,
    {
        let order = Order::new_pending(OrderId::new(), now);
        tx.save_order(&order)?;
        let effect = self
            .publisher
            .publish_order_created(tx, order.id(), correlation_id, now)?;

        info!(order_id = %order.id(), correlation_id, "order created");
        Ok(Staged::new(order.id()).with_effect(effect))
    }

    /// Create an order in its own transaction. The signal is sent only
    /// after the order is committed.
    pub fn execute(&self, correlation_id: Option<&str>) -> PipelineResult<OrderId> {
        let mut tx = self.store.begin()?;
        let staged = self.stage(&mut tx, correlation_id, Utc::now())?;
        self.publisher.commit_and_dispatch(tx, staged)
    }
}
