//! Outbox publishing with direct processing by pollers.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use order_pipeline::worker::OutboxPoller;
use order_pipeline::{
    InMemoryStore, OrderPipeline, OrderStatus, OutboxRepository, OutboxStatus, PipelineConfig,
    ProcessOrder, PublishMode, RetryPolicy, Store, Transaction, WorkerMode,
};

use crate::support::{wait_until, SwitchProcessor};

fn config() -> PipelineConfig {
    PipelineConfig::default()
        .with_publish_mode(PublishMode::Outbox)
        .with_worker_mode(WorkerMode::OutboxProcessor)
        .with_outbox_poll_interval(Duration::from_millis(10))
        .with_outbox_retry(RetryPolicy::fixed(Duration::from_millis(10)))
}

// ============================================================================
// Test 1: Created orders are processed and the backlog drains
// ============================================================================

#[test]
fn poller_drains_the_backlog() {
    let processor = Arc::new(SwitchProcessor::succeeding());
    let pipeline =
        OrderPipeline::new(config(), InMemoryStore::new(), processor.clone(), None).unwrap();

    let ids: Vec<_> = (0..7)
        .map(|i| pipeline.create_order(Some(&format!("req-{i}"))).unwrap())
        .collect();
    assert_eq!(pipeline.outbox_backlog().unwrap().pending, 7);

    let workers = pipeline.start().unwrap();
    assert!(wait_until(Duration::from_secs(3), || {
        pipeline.outbox_backlog().unwrap().total() == 0
    }));
    for worker in workers {
        worker.stop();
    }

    for id in &ids {
        let order = pipeline.get_order(*id).unwrap().unwrap();
        assert_eq!(order.status(), OrderStatus::Processed);
        assert_eq!(processor.calls(*id), 1);
    }
    let events = pipeline.store().outbox_events().unwrap();
    assert!(events.iter().all(|e| e.status == OutboxStatus::Processed));
}

// ============================================================================
// Test 2: Competing pollers never process the same order twice
// ============================================================================

#[test]
fn competing_pollers_claim_disjoint_rows() {
    let processor = Arc::new(SwitchProcessor::succeeding());
    let pipeline = OrderPipeline::new(
        config().with_worker_count(3).with_outbox_batch_size(2),
        InMemoryStore::new(),
        processor.clone(),
        None,
    )
    .unwrap();

    let ids: Vec<_> = (0..30)
        .map(|_| pipeline.create_order(None).unwrap())
        .collect();

    let workers = pipeline.start().unwrap();
    assert!(wait_until(Duration::from_secs(5), || {
        pipeline.outbox_backlog().unwrap().total() == 0
    }));
    let processed: usize = workers.into_iter().map(|w| w.stop().processed).sum();

    assert_eq!(processed, 30);
    assert_eq!(processor.total_calls(), 30);
    assert!(ids.iter().all(|id| processor.calls(*id) == 1));
}

// ============================================================================
// Test 3: Failures are retried through the outbox then dead-lettered
// ============================================================================

#[test]
fn exhausted_outbox_retries_reach_the_dlq() {
    let store = InMemoryStore::new();
    let processor = Arc::new(SwitchProcessor::failing());
    let pipeline = OrderPipeline::new(config(), store.clone(), processor.clone(), None).unwrap();

    let order_id = pipeline.create_order(None).unwrap();
    let workers = pipeline.start().unwrap();
    assert!(wait_until(Duration::from_secs(3), || {
        pipeline.get_order(order_id).unwrap().unwrap().status() == OrderStatus::Failed
    }));
    for worker in workers {
        worker.stop();
    }

    assert_eq!(processor.calls(order_id), 3);
    let events = store.outbox_events().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].status, OutboxStatus::Failed);
    assert_eq!(events[0].attempts, 2);

    let dlq = pipeline.list_dlq_entries(10).unwrap();
    assert_eq!(dlq.len(), 1);
    assert_eq!(dlq[0].reason, "downstream unavailable");
}

// ============================================================================
// Test 4: A crashed claimant's rows are recovered after the lock timeout
// ============================================================================

#[test]
fn crashed_claimant_rows_are_recovered() {
    let store = InMemoryStore::new();
    let processor = Arc::new(SwitchProcessor::succeeding());
    let pipeline = OrderPipeline::new(config(), store.clone(), processor.clone(), None).unwrap();
    let order_id = pipeline.create_order(None).unwrap();

    let now = Utc::now();
    let claimed_at = now - chrono::Duration::seconds(31);
    let mut tx = store.begin().unwrap();
    let claimed = tx.claim_ready(10, now, "crashed-worker").unwrap();
    assert_eq!(claimed.len(), 1);
    tx.mark_processing(claimed[0].id, claimed_at, "crashed-worker")
        .unwrap();
    tx.commit().unwrap();
    assert_eq!(pipeline.outbox_backlog().unwrap().processing, 1);

    let poller = OutboxPoller::new(ProcessOrder::new(store.clone(), processor.clone()))
        .with_claimant("worker-2")
        .with_lock_timeout(Duration::from_secs(30));
    let report = poller.poll_once(now).unwrap();

    assert_eq!(report.released, 1);
    assert_eq!(report.processed, 1);
    assert_eq!(processor.calls(order_id), 1);
    assert_eq!(
        pipeline.get_order(order_id).unwrap().unwrap().status(),
        OrderStatus::Processed
    );
}
