use crate::error::PipelineResult;
use crate::order::{Order, OrderId};
use crate::store::{OrderRepository, Store};

#[derive(Clone)]
pub struct GetOrder<S> {
    store: S,
}

impl<S: Store> GetOrder<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn execute(&self, order_id: OrderId) -> PipelineResult<Option<Order>> {
        self.store.in_transaction(|tx| Ok(tx.find_order(order_id)?))
    }
}
