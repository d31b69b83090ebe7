use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{error, info_span};

use super::{after, claim_batch, spawn_worker, WorkerHandle, WorkerStats};
use crate::error::{PipelineError, PipelineResult};
use crate::outbox::{correlation_id_from_payload, OutboxEvent};
use crate::retry::RetryPolicy;
use crate::store::{OutboxRepository, Store, Transaction};
use crate::usecase::{ProcessOrder, ProcessOutcome};

/// Result of one poll cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollReport {
    pub released: usize,
    pub claimed: usize,
    pub processed: usize,
    pub retried: usize,
    pub failed: usize,
    pub errors: usize,
}

/// Polls the outbox and processes orders directly.
///
/// Each claimed row is settled in the same transaction as the order
/// transition it caused, so a crash never leaves the two disagreeing.
pub struct OutboxPoller<S> {
    process: ProcessOrder<S>,
    claimant: String,
    batch_size: usize,
    max_retries: u32,
    retry: RetryPolicy,
    lock_timeout: Duration,
}

impl<S: Store> OutboxPoller<S> {
    pub fn new(process: ProcessOrder<S>) -> Self {
        Self {
            process,
            claimant: format!("worker-{}", std::process::id()),
            batch_size: 5,
            max_retries: 3,
            retry: RetryPolicy::fixed(Duration::from_secs(1)),
            lock_timeout: Duration::from_secs(30),
        }
    }

    /// Set the id written to `locked_by` on claimed rows.
    pub fn with_claimant(mut self, id: impl Into<String>) -> Self {
        self.claimant = id.into();
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn claimant(&self) -> &str {
        &self.claimant
    }

    /// Release stale locks, claim a batch, and settle each claimed row.
    ///
    /// A storage error while settling stops the cycle; rows left in
    /// PROCESSING are picked up again once their lock goes stale.
    pub fn poll_once(&self, now: DateTime<Utc>) -> PipelineResult<PollReport> {
        let store = self.process.store();
        let (released, claimed) =
            claim_batch(store, &self.claimant, self.batch_size, self.lock_timeout, now)?;

        let mut report = PollReport {
            released,
            claimed: claimed.len(),
            ..PollReport::default()
        };

        for event in &claimed {
            let correlation_id = correlation_id_from_payload(&event.payload);
            let _span = info_span!(
                "order",
                order_id = %event.aggregate_id,
                event_id = %event.id,
                correlation_id = correlation_id.as_deref()
            )
            .entered();

            match self.settle(event, now) {
                Ok(ProcessOutcome::Processed) => report.processed += 1,
                Ok(ProcessOutcome::Retry) => report.retried += 1,
                Ok(ProcessOutcome::Failed) => report.failed += 1,
                Err(error) if error.is_permanent() => {
                    report.errors += 1;
                    error!(%error, "outbox event cannot be processed, marking it failed");
                    self.fail_event(event, now, &error);
                }
                Err(error) => {
                    report.errors += 1;
                    error!(%error, "outbox poll cycle aborted");
                    break;
                }
            }
        }
        Ok(report)
    }

    fn settle(&self, event: &OutboxEvent, now: DateTime<Utc>) -> PipelineResult<ProcessOutcome> {
        let mut tx = self.process.store().begin()?;
        let outcome = self
            .process
            .execute_in(&mut tx, event.aggregate_id, now, self.max_retries)?;

        match outcome {
            ProcessOutcome::Processed => tx.mark_processed(event.id, now)?,
            ProcessOutcome::Retry => {
                let delay = self.retry.delay_for(event.attempts.saturating_add(1));
                tx.reschedule(event.id, after(now, delay), "retry")?
            }
            ProcessOutcome::Failed => tx.mark_failed(event.id, now, "failed")?,
        }
        tx.commit()?;
        Ok(outcome)
    }

    fn fail_event(&self, event: &OutboxEvent, now: DateTime<Utc>, cause: &PipelineError) {
        let reason = cause.to_string();
        let result = self
            .process
            .store()
            .in_transaction(|tx| -> PipelineResult<()> {
                Ok(tx.mark_failed(event.id, now, &reason)?)
            });
        if let Err(error) = result {
            error!(%error, "failed to mark outbox event failed");
        }
    }

    pub fn spawn(self, poll_interval: Duration) -> WorkerHandle {
        let name = self.claimant.clone();
        spawn_worker(name, move |stop| {
            let mut stats = WorkerStats::default();
            loop {
                if stop.is_stopped() {
                    break;
                }
                stats.polls += 1;

                match self.poll_once(Utc::now()) {
                    Ok(report) => {
                        stats.released_stale += report.released;
                        stats.received += report.claimed;
                        stats.processed += report.processed;
                        stats.retried += report.retried;
                        stats.failed += report.failed;
                        stats.errors += report.errors;
                    }
                    Err(error) => {
                        stats.errors += 1;
                        error!(claimant = %self.claimant, %error, "outbox poll failed");
                    }
                }

                if stop.sleep(poll_interval) {
                    break;
                }
            }
            stats
        })
    }
}
