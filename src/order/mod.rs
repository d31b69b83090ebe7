mod error;
mod order;

pub use error::TransitionError;
pub use order::{Order, OrderId, OrderStatus, UNKNOWN_REASON};
