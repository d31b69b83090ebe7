mod event;
mod payload;

// Outbox rows
pub use event::{EventId, OutboxBacklog, OutboxEvent, OutboxStatus, ORDER_CREATED};

// Order-created payload
pub use payload::{correlation_id_from_payload, OrderCreatedPayload, PayloadError};
