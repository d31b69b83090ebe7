use thiserror::Error;

use super::{OrderId, OrderStatus};

/// A transition was requested from a state that does not allow it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot {transition} order {order_id} while it is {from}")]
pub struct TransitionError {
    pub order_id: OrderId,
    pub transition: &'static str,
    pub from: OrderStatus,
}
