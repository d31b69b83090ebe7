//! In-memory publishing with the queue worker.

use std::sync::Arc;
use std::time::Duration;

use order_pipeline::{
    InMemoryStore, OrderPipeline, OrderStatus, PipelineConfig, PipelineError,
};

use crate::support::{wait_until, FlakyProcessor, SwitchProcessor};

fn config() -> PipelineConfig {
    PipelineConfig::default()
        .with_retry_delay(Duration::from_millis(10))
        .with_queue_poll_interval(Duration::from_millis(5))
}

// ============================================================================
// Test 1: Worker processes a created order
// ============================================================================

#[test]
fn worker_processes_created_order() {
    let processor = Arc::new(SwitchProcessor::succeeding());
    let pipeline = OrderPipeline::new(config(), InMemoryStore::new(), processor.clone(), None).unwrap();
    let workers = pipeline.start().unwrap();

    let order_id = pipeline.create_order(Some("req-1")).unwrap();

    assert!(wait_until(Duration::from_secs(2), || {
        pipeline.get_order(order_id).unwrap().unwrap().status() == OrderStatus::Processed
    }));

    let stats = workers.into_iter().next().unwrap().stop();
    assert_eq!(stats.processed, 1);
    assert_eq!(processor.calls(order_id), 1);
}

// ============================================================================
// Test 2: Always-failing processor ends in the DLQ after max_retries
// ============================================================================

#[test]
fn exhausted_retries_end_in_dlq() {
    let processor = Arc::new(SwitchProcessor::failing());
    let pipeline = OrderPipeline::new(config(), InMemoryStore::new(), processor.clone(), None).unwrap();
    let workers = pipeline.start().unwrap();

    let order_id = pipeline.create_order(None).unwrap();

    assert!(wait_until(Duration::from_secs(2), || {
        pipeline.get_order(order_id).unwrap().unwrap().status() == OrderStatus::Failed
    }));
    let stats = workers.into_iter().next().unwrap().stop();

    let order = pipeline.get_order(order_id).unwrap().unwrap();
    assert_eq!(order.retry_count(), 3);
    assert_eq!(order.failure_reason(), Some("downstream unavailable"));

    let dlq = pipeline.list_dlq_entries(50).unwrap();
    assert_eq!(dlq.len(), 1);
    assert_eq!(dlq[0].order_id, order_id);
    assert_eq!(dlq[0].retry_count, 3);

    assert_eq!(processor.calls(order_id), 3);
    assert_eq!(stats.retried, 2);
    assert_eq!(stats.failed, 1);
    assert!(pipeline.queue().unwrap().is_empty());
}

// ============================================================================
// Test 3: Transient failures recover before the budget runs out
// ============================================================================

#[test]
fn transient_failures_recover() {
    let pipeline = OrderPipeline::new(
        config(),
        InMemoryStore::new(),
        Arc::new(FlakyProcessor::new(2)),
        None,
    )
    .unwrap();
    let workers = pipeline.start().unwrap();

    let order_id = pipeline.create_order(None).unwrap();

    assert!(wait_until(Duration::from_secs(2), || {
        pipeline.get_order(order_id).unwrap().unwrap().status() == OrderStatus::Processed
    }));
    for worker in workers {
        worker.stop();
    }

    let order = pipeline.get_order(order_id).unwrap().unwrap();
    assert_eq!(order.retry_count(), 2);
    assert!(pipeline.list_dlq_entries(50).unwrap().is_empty());
}

// ============================================================================
// Test 4: A failed commit never reaches the queue
// ============================================================================

#[test]
fn failed_commit_publishes_nothing() {
    let store = InMemoryStore::new();
    let pipeline = OrderPipeline::new(
        config(),
        store.clone(),
        Arc::new(SwitchProcessor::succeeding()),
        None,
    )
    .unwrap();

    store.set_available(false);
    assert!(matches!(
        pipeline.create_order(None),
        Err(PipelineError::Store(_))
    ));
    store.set_available(true);

    assert!(pipeline.queue().unwrap().is_empty());
}

// ============================================================================
// Test 5: Several workers share one queue without double processing
// ============================================================================

#[test]
fn workers_share_the_queue() {
    let processor = Arc::new(SwitchProcessor::succeeding());
    let pipeline = OrderPipeline::new(
        config().with_worker_count(3),
        InMemoryStore::new(),
        processor.clone(),
        None,
    )
    .unwrap();
    let workers = pipeline.start().unwrap();

    let ids: Vec<_> = (0..20)
        .map(|_| pipeline.create_order(None).unwrap())
        .collect();

    assert!(wait_until(Duration::from_secs(3), || {
        ids.iter().all(|id| {
            pipeline.get_order(*id).unwrap().unwrap().status() == OrderStatus::Processed
        })
    }));

    let processed: usize = workers.into_iter().map(|w| w.stop().processed).sum();
    assert_eq!(processed, 20);
    assert!(ids.iter().all(|id| processor.calls(*id) == 1));
}
