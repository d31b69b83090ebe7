use thiserror::Error;

use crate::config::ConfigError;
use crate::order::{OrderId, TransitionError};
use crate::outbox::PayloadError;
use crate::store::StoreError;
use crate::transport::TransportError;

/// Errors surfaced by the use cases and the pipeline wiring.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("DLQ entry not found: {0}")]
    DlqEntryNotFound(OrderId),

    #[error(transparent)]
    InvalidStateTransition(#[from] TransitionError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("malformed message: {0}")]
    MalformedMessage(#[from] PayloadError),

    /// The write committed but signalling it afterwards failed. The order
    /// exists and stays PENDING until it is reprocessed.
    #[error("order {order_id} committed but publishing failed: {source}")]
    PublishAfterCommit {
        order_id: OrderId,
        #[source]
        source: Box<PipelineError>,
    },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl PipelineError {
    /// Errors that point at missing or inconsistent data rather than a
    /// transient outage. Retrying them cannot succeed.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            PipelineError::OrderNotFound(_)
                | PipelineError::DlqEntryNotFound(_)
                | PipelineError::InvalidStateTransition(_)
                | PipelineError::MalformedMessage(_)
        )
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
