//! Reliable order processing: a transactional outbox, skip-locked claims,
//! an order state machine, retry/backoff, dead-letter escalation and a
//! manual reprocess path.
//!
//! The building blocks are deliberately small and wired explicitly by
//! [`OrderPipeline`]:
//!
//! - [`Order`] owns its lifecycle through named transitions.
//! - [`Store`] hands out [`Transaction`]s over orders, outbox rows and DLQ entries.
//! - [`EventPublisher`] signals new work, either inside the transaction
//!   (outbox) or after commit (in-memory queue, external transport).
//! - The use cases in [`usecase`] implement create / get / process /
//!   list-DLQ / reprocess.
//! - The loops in [`worker`] consume signals on background threads.

pub mod config;
pub mod dlq;
mod error;
pub mod logging;
pub mod order;
pub mod outbox;
pub mod pipeline;
pub mod processor;
pub mod publisher;
pub mod queue;
pub mod retry;
pub mod store;
pub mod transport;
pub mod usecase;
pub mod worker;

pub use config::{ConfigError, PipelineConfig, PublishMode, WorkerMode};
pub use dlq::{DlqEntry, DLQ_LIST_DEFAULT, DLQ_LIST_MAX};
pub use error::{PipelineError, PipelineResult};
pub use order::{Order, OrderId, OrderStatus, TransitionError};
pub use outbox::{
    EventId, OrderCreatedPayload, OutboxBacklog, OutboxEvent, OutboxStatus, PayloadError,
};
pub use pipeline::OrderPipeline;
pub use processor::{OrderProcessor, ProcessorError, SimulatedOrderProcessor};
pub use publisher::{EventPublisher, SideEffect, Staged};
pub use queue::InMemoryOrderQueue;
pub use retry::RetryPolicy;
pub use store::{
    DlqRepository, InMemoryStore, OrderRepository, OutboxRepository, Store, StoreError,
    Transaction,
};
pub use transport::{
    InMemoryTransport, OutgoingMessage, QueueTransport, ReceivedMessage, TransportError,
};
pub use usecase::{
    CreateOrder, GetOrder, ListDlqEntries, ProcessOrder, ProcessOutcome, ReprocessDlqEntry,
};
pub use worker::{WorkerHandle, WorkerStats};
