use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, error, info_span, warn};

use super::{after, claim_batch, spawn_worker, WorkerHandle, WorkerStats};
use crate::error::PipelineResult;
use crate::outbox::{correlation_id_from_payload, OutboxEvent};
use crate::retry::RetryPolicy;
use crate::store::{OutboxRepository, Store};
use crate::transport::{OutgoingMessage, QueueTransport};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayReport {
    pub released: usize,
    pub claimed: usize,
    pub sent: usize,
    pub rescheduled: usize,
    pub failed: usize,
    pub errors: usize,
}

/// Forwards outbox rows to the external transport.
///
/// Payloads are sent verbatim. A failed send reschedules the row with the
/// error text; with `max_attempts` set, the row is marked failed once that
/// many sends have failed.
pub struct OutboxRelay<S> {
    store: S,
    transport: Arc<dyn QueueTransport>,
    claimant: String,
    batch_size: usize,
    retry: RetryPolicy,
    lock_timeout: Duration,
    max_attempts: Option<u32>,
}

impl<S: Store> OutboxRelay<S> {
    pub fn new(store: S, transport: Arc<dyn QueueTransport>) -> Self {
        Self {
            store,
            transport,
            claimant: format!("relay-{}", std::process::id()),
            batch_size: 5,
            retry: RetryPolicy::fixed(Duration::from_secs(5)),
            lock_timeout: Duration::from_secs(30),
            max_attempts: None,
        }
    }

    pub fn with_claimant(mut self, id: impl Into<String>) -> Self {
        self.claimant = id.into();
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
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

    pub fn with_max_attempts(mut self, max: Option<u32>) -> Self {
        self.max_attempts = max;
        self
    }

    pub fn poll_once(&self, now: DateTime<Utc>) -> PipelineResult<RelayReport> {
        let (released, claimed) =
            claim_batch(&self.store, &self.claimant, self.batch_size, self.lock_timeout, now)?;

        let mut report = RelayReport {
            released,
            claimed: claimed.len(),
            ..RelayReport::default()
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

            let message = OutgoingMessage::new(message_body(event))
                .with_correlation_id(correlation_id.as_deref());

            let settled = match self.transport.send(message) {
                Ok(message_id) => {
                    debug!(%message_id, "outbox event relayed");
                    report.sent += 1;
                    self.store
                        .in_transaction(|tx| -> PipelineResult<()> {
                            Ok(tx.mark_processed(event.id, now)?)
                        })
                }
                Err(send_error) => {
                    let reason = send_error.to_string();
                    self.handle_send_failure(event, now, &reason, &mut report)
                }
            };

            if let Err(error) = settled {
                report.errors += 1;
                error!(%error, "outbox relay cycle aborted");
                break;
            }
        }
        Ok(report)
    }

    fn handle_send_failure(
        &self,
        event: &OutboxEvent,
        now: DateTime<Utc>,
        reason: &str,
        report: &mut RelayReport,
    ) -> PipelineResult<()> {
        let attempts = event.attempts.saturating_add(1);
        let exhausted = self.max_attempts.is_some_and(|max| attempts >= max);

        if exhausted {
            error!(attempts, reason, "relay attempts exhausted, marking outbox event failed");
            report.failed += 1;
            self.store.in_transaction(|tx| -> PipelineResult<()> {
                Ok(tx.mark_failed(event.id, now, reason)?)
            })
        } else {
            let next_attempt_at = after(now, self.retry.delay_for(attempts));
            warn!(attempts, reason, %next_attempt_at, "relay send failed, rescheduling");
            report.rescheduled += 1;
            self.store.in_transaction(|tx| -> PipelineResult<()> {
                Ok(tx.reschedule(event.id, next_attempt_at, reason)?)
            })
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
                        stats.relayed += report.sent;
                        stats.retried += report.rescheduled;
                        stats.failed += report.failed;
                        stats.errors += report.errors;
                    }
                    Err(error) => {
                        stats.errors += 1;
                        error!(claimant = %self.claimant, %error, "outbox relay poll failed");
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

/// The stored payload, or a bare `{"orderId": ...}` when it is blank.
fn message_body(event: &OutboxEvent) -> String {
    if event.payload.trim().is_empty() {
        json!({ "orderId": event.aggregate_id.to_string() }).to_string()
    } else {
        event.payload.clone()
    }
}
