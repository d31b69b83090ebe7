//! External transport: outbox relay, direct publishing and the consumer.

use std::sync::Arc;
use std::time::Duration;

use order_pipeline::{
    InMemoryStore, InMemoryTransport, OrderCreatedPayload, OrderPipeline, OrderStatus,
    PipelineConfig, PipelineError, PublishMode, QueueTransport, WorkerMode,
};

use crate::support::{wait_until, SwitchProcessor};

fn pipeline(
    publish_mode: PublishMode,
    worker_mode: WorkerMode,
    transport: &InMemoryTransport,
    processor: Arc<SwitchProcessor>,
) -> OrderPipeline<InMemoryStore> {
    let config = PipelineConfig::default()
        .with_publish_mode(publish_mode)
        .with_worker_mode(worker_mode)
        .with_outbox_poll_interval(Duration::from_millis(10))
        .with_transport_wait(Duration::from_millis(10));
    let transport: Arc<dyn QueueTransport> = Arc::new(transport.clone());
    OrderPipeline::new(config, InMemoryStore::new(), processor, Some(transport)).unwrap()
}

// ============================================================================
// Test 1: Outbox rows flow through the relay to the consumer
// ============================================================================

#[test]
fn relay_and_consumer_process_end_to_end() {
    let transport = InMemoryTransport::new();
    let processor = Arc::new(SwitchProcessor::succeeding());
    let pipeline = pipeline(
        PublishMode::Outbox,
        WorkerMode::OutboxRelay,
        &transport,
        processor.clone(),
    );

    let relay = pipeline.spawn_worker(WorkerMode::OutboxRelay, 0).unwrap();
    let consumer = pipeline.spawn_worker(WorkerMode::TransportConsumer, 1).unwrap();

    let ids: Vec<_> = (0..5)
        .map(|i| pipeline.create_order(Some(&format!("req-{i}"))).unwrap())
        .collect();

    assert!(wait_until(Duration::from_secs(3), || {
        ids.iter().all(|id| {
            pipeline.get_order(*id).unwrap().unwrap().status() == OrderStatus::Processed
        })
    }));

    let relay_stats = relay.stop();
    let consumer_stats = consumer.stop();
    assert_eq!(relay_stats.relayed, 5);
    assert_eq!(consumer_stats.processed, 5);
    assert_eq!(pipeline.outbox_backlog().unwrap().total(), 0);
    assert!(transport.is_empty());
    assert!(ids.iter().all(|id| processor.calls(*id) == 1));
}

// ============================================================================
// Test 2: Direct publishing carries the correlation id
// ============================================================================

#[test]
fn direct_publish_sets_correlation_attribute() {
    let transport = InMemoryTransport::new();
    let pipeline = pipeline(
        PublishMode::Transport,
        WorkerMode::TransportConsumer,
        &transport,
        Arc::new(SwitchProcessor::succeeding()),
    );

    let order_id = pipeline.create_order(Some("req-9")).unwrap();
    assert_eq!(pipeline.outbox_backlog().unwrap().total(), 0);

    let message = transport.receive(Duration::ZERO).unwrap().unwrap();
    assert_eq!(message.correlation_id(), Some("req-9"));
    let payload = OrderCreatedPayload::parse(&message.body).unwrap();
    assert_eq!(payload.order_id, order_id);
    assert_eq!(payload.correlation_id.as_deref(), Some("req-9"));
}

// ============================================================================
// Test 3: A transport outage after commit is reported, the order is kept
// ============================================================================

#[test]
fn publish_failure_after_commit_keeps_the_order() {
    let transport = InMemoryTransport::new();
    let pipeline = pipeline(
        PublishMode::Transport,
        WorkerMode::TransportConsumer,
        &transport,
        Arc::new(SwitchProcessor::succeeding()),
    );

    transport.set_available(false);
    let err = pipeline.create_order(None).unwrap_err();
    let PipelineError::PublishAfterCommit { order_id, .. } = err else {
        panic!("expected PublishAfterCommit, got {err:?}");
    };

    let order = pipeline.get_order(order_id).unwrap().unwrap();
    assert_eq!(order.status(), OrderStatus::Pending);
    transport.set_available(true);
    assert!(transport.is_empty());
}

// ============================================================================
// Test 4: Unacknowledged failures end in both dead-letter queues
// ============================================================================

#[test]
fn failed_order_is_redriven_by_the_transport() {
    let transport = InMemoryTransport::new()
        .with_visibility_timeout(Duration::ZERO)
        .with_max_receive_count(4);
    let processor = Arc::new(SwitchProcessor::failing());
    let pipeline = pipeline(
        PublishMode::Transport,
        WorkerMode::TransportConsumer,
        &transport,
        processor.clone(),
    );
    let workers = pipeline.start().unwrap();

    let order_id = pipeline.create_order(None).unwrap();

    assert!(wait_until(Duration::from_secs(3), || {
        transport.dead_letters().len() == 1
    }));
    let stats: Vec<_> = workers.into_iter().map(|w| w.stop()).collect();

    let order = pipeline.get_order(order_id).unwrap().unwrap();
    assert_eq!(order.status(), OrderStatus::Failed);
    assert_eq!(order.retry_count(), 3);
    assert_eq!(processor.calls(order_id), 3);

    let dlq = pipeline.list_dlq_entries(10).unwrap();
    assert_eq!(dlq.len(), 1);
    assert_eq!(dlq[0].order_id, order_id);

    assert!(transport.is_empty());
    assert_eq!(stats[0].processed, 0);
    assert!(stats[0].failed >= 1);
}
