//! Explicit wiring of the store, publisher, processor and workers.

use std::sync::Arc;

use tracing::info;

use crate::config::{ConfigError, PipelineConfig, PublishMode, WorkerMode};
use crate::dlq::DlqEntry;
use crate::error::PipelineResult;
use crate::order::{Order, OrderId};
use crate::outbox::OutboxBacklog;
use crate::processor::OrderProcessor;
use crate::publisher::EventPublisher;
use crate::queue::InMemoryOrderQueue;
use crate::store::{OutboxRepository, Store};
use crate::transport::QueueTransport;
use crate::usecase::{
    CreateOrder, GetOrder, ListDlqEntries, ProcessOrder, ProcessOutcome, ReprocessDlqEntry,
};
use crate::worker::{OutboxPoller, OutboxRelay, QueueWorker, TransportConsumer, WorkerHandle};

/// A fully wired order pipeline.
///
/// ## Example
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
/// use order_pipeline::{
///     InMemoryStore, OrderPipeline, OrderStatus, PipelineConfig, SimulatedOrderProcessor,
/// };
///
/// let config = PipelineConfig::default().with_queue_poll_interval(Duration::from_millis(10));
/// let processor = Arc::new(SimulatedOrderProcessor::new(0.0, Duration::ZERO));
/// let pipeline = OrderPipeline::new(config, InMemoryStore::new(), processor, None).unwrap();
///
/// let workers = pipeline.start().unwrap();
/// let order_id = pipeline.create_order(Some("req-1")).unwrap();
///
/// let mut status = OrderStatus::Pending;
/// for _ in 0..200 {
///     status = pipeline.get_order(order_id).unwrap().unwrap().status();
///     if status == OrderStatus::Processed {
///         break;
///     }
///     std::thread::sleep(Duration::from_millis(10));
/// }
/// assert_eq!(status, OrderStatus::Processed);
///
/// for worker in workers {
///     worker.stop();
/// }
/// ```
pub struct OrderPipeline<S: Store> {
    config: PipelineConfig,
    store: S,
    publisher: EventPublisher,
    queue: Option<InMemoryOrderQueue>,
    transport: Option<Arc<dyn QueueTransport>>,
    create_order: CreateOrder<S>,
    get_order: GetOrder<S>,
    list_dlq: ListDlqEntries<S>,
    reprocess: ReprocessDlqEntry<S>,
    process: ProcessOrder<S>,
}

impl<S: Store> OrderPipeline<S> {
    pub fn new(
        config: PipelineConfig,
        store: S,
        processor: Arc<dyn OrderProcessor>,
        transport: Option<Arc<dyn QueueTransport>>,
    ) -> PipelineResult<Self> {
        config.validate()?;

        let queue = match config.publish_mode {
            PublishMode::InMemory => Some(InMemoryOrderQueue::new()),
            PublishMode::Outbox | PublishMode::Transport => None,
        };
        let publisher = match (config.publish_mode, &queue) {
            (PublishMode::InMemory, Some(queue)) => EventPublisher::InMemory(queue.clone()),
            (PublishMode::Outbox, _) => EventPublisher::Outbox,
            _ => EventPublisher::Transport(require_transport(&transport, "transport publishing")?),
        };

        info!(
            publish_mode = ?config.publish_mode,
            worker_mode = ?config.worker_mode,
            worker_count = config.worker_count,
            max_retries = config.max_retries,
            "order pipeline configured"
        );

        Ok(Self {
            create_order: CreateOrder::new(store.clone(), publisher.clone()),
            get_order: GetOrder::new(store.clone()),
            list_dlq: ListDlqEntries::new(store.clone()),
            reprocess: ReprocessDlqEntry::new(store.clone(), publisher.clone()),
            process: ProcessOrder::new(store.clone(), processor),
            config,
            store,
            publisher,
            queue,
            transport,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn publisher(&self) -> &EventPublisher {
        &self.publisher
    }

    /// The in-process queue, present in in-memory publish mode.
    pub fn queue(&self) -> Option<&InMemoryOrderQueue> {
        self.queue.as_ref()
    }

    pub fn create_order(&self, correlation_id: Option<&str>) -> PipelineResult<OrderId> {
        self.create_order.execute(correlation_id)
    }

    pub fn get_order(&self, order_id: OrderId) -> PipelineResult<Option<Order>> {
        self.get_order.execute(order_id)
    }

    pub fn list_dlq_entries(&self, limit: usize) -> PipelineResult<Vec<DlqEntry>> {
        self.list_dlq.execute(limit)
    }

    pub fn reprocess_dlq_entry(&self, order_id: OrderId) -> PipelineResult<()> {
        self.reprocess.execute(order_id)
    }

    /// Run one processing attempt synchronously.
    pub fn process_order(&self, order_id: OrderId) -> PipelineResult<ProcessOutcome> {
        self.process.execute(order_id, self.config.max_retries)
    }

    /// Outbox rows still owed work.
    pub fn outbox_backlog(&self) -> PipelineResult<OutboxBacklog> {
        self.store
            .in_transaction(|tx| Ok(tx.backlog()?))
    }

    /// Start `worker_count` threads running the configured worker mode.
    pub fn start(&self) -> PipelineResult<Vec<WorkerHandle>> {
        (0..self.config.worker_count)
            .map(|index| self.spawn_worker(self.config.worker_mode, index))
            .collect()
    }

    /// Start one worker thread of the given mode.
    pub fn spawn_worker(&self, mode: WorkerMode, index: usize) -> PipelineResult<WorkerHandle> {
        let config = &self.config;
        let name = if index == 0 {
            config.worker_id.clone()
        } else {
            format!("{}-{}", config.worker_id, index + 1)
        };

        let handle = match mode {
            WorkerMode::InMemory => {
                let queue = self.queue.clone().ok_or_else(|| {
                    ConfigError::Invalid("in-memory workers need in-memory publishing".into())
                })?;
                QueueWorker::new(queue, self.process.clone())
                    .with_max_retries(config.max_retries)
                    .with_retry_delay(config.retry_delay())
                    .with_poll_interval(config.queue_poll_interval())
                    .spawn(name)
            }
            WorkerMode::OutboxProcessor => OutboxPoller::new(self.process.clone())
                .with_claimant(name)
                .with_batch_size(config.outbox_batch_size)
                .with_max_retries(config.max_retries)
                .with_retry_policy(config.outbox_retry)
                .with_lock_timeout(config.outbox_lock_timeout())
                .spawn(config.outbox_poll_interval()),
            WorkerMode::OutboxRelay => {
                let transport = require_transport(&self.transport, "the outbox relay")?;
                OutboxRelay::new(self.store.clone(), transport)
                    .with_claimant(name)
                    .with_batch_size(config.outbox_batch_size)
                    .with_retry_policy(config.relay_retry)
                    .with_lock_timeout(config.outbox_lock_timeout())
                    .with_max_attempts(config.relay_max_attempts)
                    .spawn(config.outbox_poll_interval())
            }
            WorkerMode::TransportConsumer => {
                let transport = require_transport(&self.transport, "the transport consumer")?;
                TransportConsumer::new(transport, self.process.clone())
                    .with_max_retries(config.max_retries)
                    .with_wait(config.transport_wait())
                    .spawn(name)
            }
        };

        info!(worker = handle.name(), ?mode, "worker started");
        Ok(handle)
    }
}

fn require_transport(
    transport: &Option<Arc<dyn QueueTransport>>,
    needed_by: &str,
) -> Result<Arc<dyn QueueTransport>, ConfigError> {
    transport
        .clone()
        .ok_or_else(|| ConfigError::Invalid(format!("{needed_by} needs a queue transport")))
}
