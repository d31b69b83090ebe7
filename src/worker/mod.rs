//! Background consumer loops.
//!
//! Each loop runs on its own thread and is controlled through a
//! [`WorkerHandle`]. Stopping is cooperative: the current item finishes,
//! then the loop exits and hands back its [`WorkerStats`].

mod outbox_poller;
mod outbox_relay;
mod queue_worker;
mod transport_consumer;

use std::cell::Cell;
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::PipelineResult;
use crate::outbox::OutboxEvent;
use crate::store::{OutboxRepository, Store};

pub use outbox_poller::{OutboxPoller, PollReport};
pub use outbox_relay::{OutboxRelay, RelayReport};
pub use queue_worker::QueueWorker;
pub use transport_consumer::{ConsumeOutcome, TransportConsumer};

/// Counters accumulated by a worker thread.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WorkerStats {
    pub polls: usize,
    /// Signals picked up: queue ids, claimed rows or received messages.
    pub received: usize,
    pub processed: usize,
    pub retried: usize,
    pub failed: usize,
    /// Rows forwarded to the external transport.
    pub relayed: usize,
    pub released_stale: usize,
    pub malformed: usize,
    pub errors: usize,
}

/// Handle to a running worker thread.
///
/// ## Example
///
/// ```ignore
/// let worker = OutboxPoller::new(process).spawn(Duration::from_millis(50));
///
/// // ... do work ...
///
/// let stats = worker.stop();
/// println!("Processed {} orders", stats.processed);
/// ```
pub struct WorkerHandle {
    name: String,
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<WorkerStats>>,
}

impl WorkerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Signal the worker to stop and wait for it to finish.
    /// Returns the worker statistics.
    pub fn stop(mut self) -> WorkerStats {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.handle.take() {
            handle.join().unwrap_or_default()
        } else {
            WorkerStats::default()
        }
    }

    /// Signal the worker to stop without waiting.
    pub fn signal_stop(&self) {
        let _ = self.stop_tx.send(());
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
        // Don't join on drop - let the thread finish naturally
    }
}

/// Receiving side of a worker's stop channel.
pub(crate) struct StopSignal {
    rx: Receiver<()>,
    stopped: Cell<bool>,
}

impl StopSignal {
    pub(crate) fn is_stopped(&self) -> bool {
        if self.stopped.get() {
            return true;
        }
        match self.rx.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => {
                self.stopped.set(true);
                true
            }
            Err(TryRecvError::Empty) => false,
        }
    }

    /// Sleep for `duration` unless a stop arrives first.
    /// Returns `true` when the worker should stop.
    pub(crate) fn sleep(&self, duration: Duration) -> bool {
        if self.is_stopped() {
            return true;
        }
        match self.rx.recv_timeout(duration) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                self.stopped.set(true);
                true
            }
            Err(RecvTimeoutError::Timeout) => false,
        }
    }
}

/// Run `body` on a new thread, passing it the stop signal.
pub(crate) fn spawn_worker<F>(name: impl Into<String>, body: F) -> WorkerHandle
where
    F: FnOnce(&StopSignal) -> WorkerStats + Send + 'static,
{
    let name = name.into();
    let (stop_tx, stop_rx) = channel();
    let thread_name = name.clone();

    let handle = thread::spawn(move || {
        let stop = StopSignal {
            rx: stop_rx,
            stopped: Cell::new(false),
        };
        debug!(worker = %thread_name, "worker started");
        let stats = body(&stop);
        debug!(worker = %thread_name, ?stats, "worker stopped");
        stats
    });

    WorkerHandle {
        name,
        stop_tx,
        handle: Some(handle),
    }
}

/// Release stale outbox locks, then claim a batch and mark it PROCESSING.
///
/// The claim and the status flip commit together, so the row locks are
/// only held for that short transaction; the PROCESSING status and
/// `locked_at` keep other pollers away until the row is settled or the
/// lock goes stale.
pub(crate) fn claim_batch<S: Store>(
    store: &S,
    claimant: &str,
    batch_size: usize,
    lock_timeout: Duration,
    now: DateTime<Utc>,
) -> PipelineResult<(usize, Vec<OutboxEvent>)> {
    let stale_before = shift(now, lock_timeout, false);
    let released = store.in_transaction(|tx| -> PipelineResult<usize> {
        Ok(tx.release_stale_locks(stale_before)?)
    })?;
    if released > 0 {
        warn!(released, claimant, "released stale outbox locks");
    }

    let claimed = store.in_transaction(|tx| -> PipelineResult<Vec<OutboxEvent>> {
        let events = tx.claim_ready(batch_size, now, claimant)?;
        for event in &events {
            tx.mark_processing(event.id, now, claimant)?;
        }
        Ok(events)
    })?;
    Ok((released, claimed))
}

pub(crate) fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    shift(now, delay, true)
}

fn shift(now: DateTime<Utc>, by: Duration, forward: bool) -> DateTime<Utc> {
    let delta = chrono::Duration::from_std(by).ok();
    let shifted = if forward {
        delta.and_then(|d| now.checked_add_signed(d))
    } else {
        delta.and_then(|d| now.checked_sub_signed(d))
    };
    shifted.unwrap_or(if forward {
        DateTime::<Utc>::MAX_UTC
    } else {
        DateTime::<Utc>::MIN_UTC
    })
}
