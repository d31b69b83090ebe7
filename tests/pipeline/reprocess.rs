//! Operator reprocessing of dead-lettered orders.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use order_pipeline::{
    DlqRepository, InMemoryStore, OrderId, OrderPipeline, OrderStatus, PipelineConfig,
    PipelineError, PublishMode, RetryPolicy, Store, Transaction, WorkerMode, DLQ_LIST_MAX,
};

use crate::support::{wait_until, SwitchProcessor};

fn fail_one_order(pipeline: &OrderPipeline<InMemoryStore>) -> OrderId {
    let order_id = pipeline.create_order(Some("req-dlq")).unwrap();
    let workers = pipeline.start().unwrap();
    assert!(wait_until(Duration::from_secs(3), || {
        pipeline.get_order(order_id).unwrap().unwrap().status() == OrderStatus::Failed
    }));
    for worker in workers {
        worker.stop();
    }
    order_id
}

// ============================================================================
// Test 1: Reprocessing re-delivers a failed order exactly once
// ============================================================================

#[test]
fn reprocessed_order_is_delivered_again() {
    let processor = Arc::new(SwitchProcessor::failing());
    let config = PipelineConfig::default()
        .with_retry_delay(Duration::from_millis(5))
        .with_queue_poll_interval(Duration::from_millis(5));
    let pipeline = OrderPipeline::new(config, InMemoryStore::new(), processor.clone(), None).unwrap();

    let order_id = fail_one_order(&pipeline);
    assert_eq!(processor.calls(order_id), 3);
    assert_eq!(pipeline.list_dlq_entries(10).unwrap().len(), 1);

    processor.set_failing(false);
    pipeline.reprocess_dlq_entry(order_id).unwrap();

    let order = pipeline.get_order(order_id).unwrap().unwrap();
    assert_eq!(order.status(), OrderStatus::Pending);
    assert_eq!(order.failure_reason(), Some("manual reprocess"));
    assert!(pipeline.list_dlq_entries(10).unwrap().is_empty());
    assert_eq!(pipeline.queue().unwrap().len(), 1);

    let workers = pipeline.start().unwrap();
    assert!(wait_until(Duration::from_secs(3), || {
        pipeline.get_order(order_id).unwrap().unwrap().status() == OrderStatus::Processed
    }));
    for worker in workers {
        worker.stop();
    }

    assert_eq!(processor.calls(order_id), 4);
    assert_eq!(pipeline.get_order(order_id).unwrap().unwrap().retry_count(), 3);
}

// ============================================================================
// Test 2: A second reprocess of the same order is rejected
// ============================================================================

#[test]
fn double_reprocess_is_rejected() {
    let processor = Arc::new(SwitchProcessor::failing());
    let config = PipelineConfig::default()
        .with_publish_mode(PublishMode::Outbox)
        .with_worker_mode(WorkerMode::OutboxProcessor)
        .with_outbox_poll_interval(Duration::from_millis(5))
        .with_outbox_retry(RetryPolicy::fixed(Duration::from_millis(5)));
    let pipeline = OrderPipeline::new(config, InMemoryStore::new(), processor, None).unwrap();

    let order_id = fail_one_order(&pipeline);

    pipeline.reprocess_dlq_entry(order_id).unwrap();
    assert_eq!(pipeline.outbox_backlog().unwrap().pending, 1);

    assert!(matches!(
        pipeline.reprocess_dlq_entry(order_id),
        Err(PipelineError::DlqEntryNotFound(id)) if id == order_id
    ));
    assert_eq!(pipeline.outbox_backlog().unwrap().pending, 1);
}

// ============================================================================
// Test 3: Unknown orders cannot be reprocessed
// ============================================================================

#[test]
fn unknown_order_is_rejected() {
    let pipeline = OrderPipeline::new(
        PipelineConfig::default(),
        InMemoryStore::new(),
        Arc::new(SwitchProcessor::succeeding()),
        None,
    )
    .unwrap();

    let err = pipeline.reprocess_dlq_entry(OrderId::new()).unwrap_err();
    assert!(matches!(err, PipelineError::DlqEntryNotFound(_)));
    assert!(err.is_permanent());
    assert!(pipeline.queue().unwrap().is_empty());
}

// ============================================================================
// Test 4: DLQ listing is newest first and capped
// ============================================================================

#[test]
fn dlq_listing_is_capped_newest_first() {
    let store = InMemoryStore::new();
    let pipeline = OrderPipeline::new(
        PipelineConfig::default(),
        store.clone(),
        Arc::new(SwitchProcessor::succeeding()),
        None,
    )
    .unwrap();

    let start = Utc::now();
    let mut tx = store.begin().unwrap();
    for i in 0..250 {
        tx.save_dlq_entry(OrderId::new(), "boom", 3, start + chrono::Duration::seconds(i))
            .unwrap();
    }
    tx.commit().unwrap();

    let entries = pipeline.list_dlq_entries(500).unwrap();
    assert_eq!(entries.len(), DLQ_LIST_MAX);
    assert_eq!(entries[0].failed_at, start + chrono::Duration::seconds(249));
    assert!(entries.windows(2).all(|w| w[0].failed_at >= w[1].failed_at));

    assert_eq!(pipeline.list_dlq_entries(0).unwrap().len(), 1);
}
