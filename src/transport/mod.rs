//! External message queue seam.
//!
//! [`QueueTransport`] is the boundary to a managed queue with visibility
//! timeouts and its own redrive dead-letter queue. [`InMemoryTransport`]
//! reproduces those semantics in process.

mod error;
mod in_memory;

use std::collections::BTreeMap;
use std::time::Duration;

pub use error::TransportError;
pub use in_memory::{InMemoryTransport, MAX_VISIBILITY_TIMEOUT};

/// Attribute carrying the request correlation id.
pub const CORRELATION_ID_ATTRIBUTE: &str = "correlationId";

/// A message to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub body: String,
    pub attributes: BTreeMap<String, String>,
}

impl OutgoingMessage {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Attach the correlation id when there is one.
    pub fn with_correlation_id(self, correlation_id: Option<&str>) -> Self {
        match correlation_id {
            Some(id) => self.with_attribute(CORRELATION_ID_ATTRIBUTE, id),
            None => self,
        }
    }
}

/// A message handed out by [`QueueTransport::receive`].
///
/// It stays invisible to other receivers until it is deleted through its
/// `receipt_handle` or the visibility timeout expires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub message_id: String,
    pub receipt_handle: String,
    pub body: String,
    pub attributes: BTreeMap<String, String>,
    pub receive_count: u32,
}

impl ReceivedMessage {
    pub fn correlation_id(&self) -> Option<&str> {
        self.attributes
            .get(CORRELATION_ID_ATTRIBUTE)
            .map(String::as_str)
            .filter(|c| !c.trim().is_empty())
    }
}

pub trait QueueTransport: Send + Sync {
    /// Send one message, returning its transport-assigned id.
    fn send(&self, message: OutgoingMessage) -> Result<String, TransportError>;

    /// Receive at most one message, waiting up to `wait` for one to arrive.
    fn receive(&self, wait: Duration) -> Result<Option<ReceivedMessage>, TransportError>;

    /// Acknowledge a received message so it is never redelivered.
    fn delete(&self, receipt_handle: &str) -> Result<(), TransportError>;
}
