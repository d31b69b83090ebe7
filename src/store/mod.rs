mod error;
mod in_memory;
mod repository;
mod row_lock;

pub use error::StoreError;
pub use in_memory::{InMemoryStore, InMemoryTransaction};
pub use repository::{DlqRepository, OrderRepository, OutboxRepository, Store, Transaction};
