use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info_span, warn};

use super::{spawn_worker, WorkerHandle, WorkerStats};
use crate::error::PipelineResult;
use crate::outbox::OrderCreatedPayload;
use crate::store::Store;
use crate::transport::QueueTransport;
use crate::usecase::{ProcessOrder, ProcessOutcome};

/// What one receive did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// Nothing arrived within the wait.
    Idle,
    Processed,
    Retry,
    Failed,
    /// The body had no usable order id. Left for the transport's redrive.
    Malformed,
    /// Processing raised an error. Left for redelivery.
    Errored,
}

/// Receives order messages from the external transport.
///
/// Only a processed order is acknowledged. Anything else stays on the
/// transport and comes back after its visibility timeout, until the
/// transport's own redrive policy moves it to its dead-letter queue.
pub struct TransportConsumer<S> {
    transport: Arc<dyn QueueTransport>,
    process: ProcessOrder<S>,
    max_retries: u32,
    wait: Duration,
}

impl<S: Store> TransportConsumer<S> {
    pub fn new(transport: Arc<dyn QueueTransport>, process: ProcessOrder<S>) -> Self {
        Self {
            transport,
            process,
            max_retries: 3,
            wait: Duration::from_secs(1),
        }
    }

    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    /// Long-poll duration for each receive.
    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    /// Receive and handle at most one message.
    pub fn poll_once(&self) -> PipelineResult<ConsumeOutcome> {
        let Some(message) = self.transport.receive(self.wait)? else {
            return Ok(ConsumeOutcome::Idle);
        };

        let payload = match OrderCreatedPayload::parse(&message.body) {
            Ok(payload) => payload,
            Err(error) => {
                error!(
                    message_id = %message.message_id,
                    %error,
                    "malformed order message, leaving it for redrive"
                );
                return Ok(ConsumeOutcome::Malformed);
            }
        };

        let correlation_id = message
            .correlation_id()
            .map(str::to_string)
            .or(payload.correlation_id);
        let _span = info_span!(
            "order",
            order_id = %payload.order_id,
            message_id = %message.message_id,
            correlation_id = correlation_id.as_deref()
        )
        .entered();

        match self.process.execute(payload.order_id, self.max_retries) {
            Ok(ProcessOutcome::Processed) => {
                if let Err(error) = self.transport.delete(&message.receipt_handle) {
                    warn!(%error, "failed to delete processed message");
                }
                Ok(ConsumeOutcome::Processed)
            }
            Ok(ProcessOutcome::Retry) => {
                warn!(
                    receive_count = message.receive_count,
                    "order will retry, leaving message for redelivery"
                );
                Ok(ConsumeOutcome::Retry)
            }
            Ok(ProcessOutcome::Failed) => {
                error!(
                    receive_count = message.receive_count,
                    "order failed, message left unacknowledged"
                );
                Ok(ConsumeOutcome::Failed)
            }
            Err(error) => {
                error!(%error, "order processing errored, leaving message for redelivery");
                Ok(ConsumeOutcome::Errored)
            }
        }
    }

    pub fn spawn(self, name: impl Into<String>) -> WorkerHandle {
        spawn_worker(name, move |stop| {
            let mut stats = WorkerStats::default();
            while !stop.is_stopped() {
                stats.polls += 1;
                match self.poll_once() {
                    Ok(ConsumeOutcome::Idle) => {}
                    Ok(outcome) => {
                        stats.received += 1;
                        match outcome {
                            ConsumeOutcome::Processed => stats.processed += 1,
                            ConsumeOutcome::Retry => stats.retried += 1,
                            ConsumeOutcome::Failed => stats.failed += 1,
                            ConsumeOutcome::Malformed => stats.malformed += 1,
                            ConsumeOutcome::Errored => stats.errors += 1,
                            ConsumeOutcome::Idle => {}
                        }
                    }
                    Err(error) => {
                        stats.errors += 1;
                        error!(%error, "transport receive failed");
                        if stop.sleep(self.wait) {
                            break;
                        }
                    }
                }
            }
            stats
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::{Order, OrderId, OrderStatus};
    use crate::processor::{OrderProcessor, ProcessorError};
    use crate::store::{InMemoryStore, OrderRepository, Transaction};
    use crate::transport::{InMemoryTransport, OutgoingMessage};
    use chrono::Utc;

    fn consumer(
        store: &InMemoryStore,
        transport: &InMemoryTransport,
        processor: Arc<dyn OrderProcessor>,
    ) -> TransportConsumer<InMemoryStore> {
        TransportConsumer::new(
            Arc::new(transport.clone()),
            ProcessOrder::new(store.clone(), processor),
        )
        .with_wait(Duration::ZERO)
    }

    fn seed(store: &InMemoryStore) -> OrderId {
        let order = Order::new_pending(OrderId::new(), Utc::now());
        let mut tx = store.begin().unwrap();
        tx.save_order(&order).unwrap();
        tx.commit().unwrap();
        order.id()
    }

    #[test]
    fn processed_message_is_deleted() {
        let store = InMemoryStore::new();
        let transport = InMemoryTransport::new();
        let id = seed(&store);
        transport
            .send(OutgoingMessage::new(OrderCreatedPayload::new(id, None).to_json()))
            .unwrap();

        let consumer = consumer(
            &store,
            &transport,
            Arc::new(|_: OrderId| -> Result<(), ProcessorError> { Ok(()) }),
        );
        assert_eq!(consumer.poll_once().unwrap(), ConsumeOutcome::Processed);
        assert!(transport.is_empty());
        assert_eq!(store.order(id).unwrap().unwrap().status(), OrderStatus::Processed);
        assert_eq!(consumer.poll_once().unwrap(), ConsumeOutcome::Idle);
    }

    #[test]
    fn retry_leaves_message_for_redelivery() {
        let store = InMemoryStore::new();
        let transport = InMemoryTransport::new().with_visibility_timeout(Duration::ZERO);
        let id = seed(&store);
        transport
            .send(OutgoingMessage::new(OrderCreatedPayload::new(id, None).to_json()))
            .unwrap();

        let consumer = consumer(
            &store,
            &transport,
            Arc::new(|_: OrderId| -> Result<(), ProcessorError> { Err(ProcessorError::new("x")) }),
        );
        assert_eq!(consumer.poll_once().unwrap(), ConsumeOutcome::Retry);
        assert_eq!(transport.len(), 1);
        assert_eq!(consumer.poll_once().unwrap(), ConsumeOutcome::Retry);
        assert_eq!(consumer.poll_once().unwrap(), ConsumeOutcome::Failed);
        assert_eq!(store.dlq_entries().unwrap().len(), 1);

        // terminal order: redeliveries are no-ops until the transport redrives
        assert_eq!(consumer.poll_once().unwrap(), ConsumeOutcome::Failed);
        assert_eq!(store.order(id).unwrap().unwrap().retry_count(), 3);
    }

    #[test]
    fn malformed_body_is_not_processed() {
        let store = InMemoryStore::new();
        let transport = InMemoryTransport::new();
        transport.send(OutgoingMessage::new("{\"nope\":1}")).unwrap();

        let consumer = consumer(
            &store,
            &transport,
            Arc::new(|_: OrderId| -> Result<(), ProcessorError> { Ok(()) }),
        );
        assert_eq!(consumer.poll_once().unwrap(), ConsumeOutcome::Malformed);
        assert_eq!(transport.len(), 1);
    }

    #[test]
    fn receive_failure_is_an_error() {
        let transport = InMemoryTransport::new();
        transport.set_available(false);
        let consumer = consumer(
            &InMemoryStore::new(),
            &transport,
            Arc::new(|_: OrderId| -> Result<(), ProcessorError> { Ok(()) }),
        );
        assert!(consumer.poll_once().is_err());
    }
}
