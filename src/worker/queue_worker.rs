use std::time::Duration;

use tracing::{error, info_span, warn};

use super::{spawn_worker, StopSignal, WorkerHandle, WorkerStats};
use crate::order::OrderId;
use crate::queue::InMemoryOrderQueue;
use crate::store::Store;
use crate::usecase::{ProcessOrder, ProcessOutcome};

/// Consumes order ids from the in-memory queue.
///
/// A retry sleeps the fixed backoff and then puts the same id back at the
/// tail of the queue. Transient storage errors are treated the same way so
/// the id is not lost.
pub struct QueueWorker<S> {
    queue: InMemoryOrderQueue,
    process: ProcessOrder<S>,
    max_retries: u32,
    retry_delay: Duration,
    poll_interval: Duration,
}

impl<S: Store> QueueWorker<S> {
    pub fn new(queue: InMemoryOrderQueue, process: ProcessOrder<S>) -> Self {
        Self {
            queue,
            process,
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            poll_interval: Duration::from_millis(100),
        }
    }

    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// How long a blocking pop waits before re-checking for a stop request.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn spawn(self, name: impl Into<String>) -> WorkerHandle {
        spawn_worker(name, move |stop| {
            let mut stats = WorkerStats::default();
            while !stop.is_stopped() {
                stats.polls += 1;
                if let Some(order_id) = self.queue.poll(self.poll_interval) {
                    stats.received += 1;
                    self.handle(order_id, stop, &mut stats);
                }
            }
            stats
        })
    }

    fn handle(&self, order_id: OrderId, stop: &StopSignal, stats: &mut WorkerStats) {
        let _span = info_span!("order", %order_id).entered();

        let requeue = match self.process.execute(order_id, self.max_retries) {
            Ok(ProcessOutcome::Processed) => {
                stats.processed += 1;
                false
            }
            Ok(ProcessOutcome::Failed) => {
                stats.failed += 1;
                false
            }
            Ok(ProcessOutcome::Retry) => {
                stats.retried += 1;
                true
            }
            Err(error) if error.is_permanent() => {
                stats.errors += 1;
                error!(%error, "order cannot be processed, dropping signal");
                false
            }
            Err(error) => {
                stats.errors += 1;
                warn!(%error, "order processing errored, will retry");
                true
            }
        };

        if requeue {
            // On stop the id goes back immediately so it is not lost.
            stop.sleep(self.retry_delay);
            self.queue.publish(order_id);
        }
    }
}
