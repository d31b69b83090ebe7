use thiserror::Error;

use crate::outbox::EventId;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} lock poisoned")]
    LockPoisoned(&'static str),

    #[error("outbox event not found: {0}")]
    EventNotFound(EventId),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}
