use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::warn;
use uuid::Uuid;

use super::{OutgoingMessage, QueueTransport, ReceivedMessage, TransportError};

/// Longest a received message can stay hidden, as with SQS.
pub const MAX_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(12 * 60 * 60);

#[derive(Debug, Clone)]
struct StoredMessage {
    id: String,
    body: String,
    attributes: BTreeMap<String, String>,
    receive_count: u32,
    invisible_until: Option<Instant>,
    receipt_handle: Option<String>,
}

struct TransportState {
    messages: VecDeque<StoredMessage>,
    dead_letters: Vec<StoredMessage>,
    available: bool,
}

/// In-process queue with visibility timeouts and a redrive dead-letter list.
///
/// A received message is hidden for `visibility_timeout`; if it is not
/// deleted by then it becomes visible again. A message already received
/// `max_receive_count` times is moved to the dead-letter list on its next
/// receive instead of being delivered.
#[derive(Clone)]
pub struct InMemoryTransport {
    shared: Arc<(Mutex<TransportState>, Condvar)>,
    visibility_timeout: Duration,
    max_receive_count: u32,
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self {
            shared: Arc::new((
                Mutex::new(TransportState {
                    messages: VecDeque::new(),
                    dead_letters: Vec::new(),
                    available: true,
                }),
                Condvar::new(),
            )),
            visibility_timeout: Duration::from_secs(30),
            max_receive_count: 5,
        }
    }

    /// Capped at [`MAX_VISIBILITY_TIMEOUT`].
    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout.min(MAX_VISIBILITY_TIMEOUT);
        self
    }

    pub fn with_max_receive_count(mut self, count: u32) -> Self {
        self.max_receive_count = count.max(1);
        self
    }

    /// Simulate an outage: while unavailable every call fails.
    pub fn set_available(&self, available: bool) {
        if let Ok(mut state) = self.state() {
            state.available = available;
        }
        self.shared.1.notify_all();
    }

    /// Messages not yet deleted or redriven, visible or in flight.
    pub fn len(&self) -> usize {
        self.state().map(|s| s.messages.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bodies of messages redriven to the dead-letter list.
    pub fn dead_letters(&self) -> Vec<String> {
        self.state()
            .map(|s| s.dead_letters.iter().map(|m| m.body.clone()).collect())
            .unwrap_or_default()
    }

    fn state(&self) -> Result<MutexGuard<'_, TransportState>, TransportError> {
        self.shared
            .0
            .lock()
            .map_err(|_| TransportError::LockPoisoned("transport"))
    }

    fn check_available(state: &TransportState) -> Result<(), TransportError> {
        if state.available {
            Ok(())
        } else {
            Err(TransportError::Unavailable("in-memory transport is offline".into()))
        }
    }

    fn next_visible(&self, state: &mut TransportState, now: Instant) -> Option<ReceivedMessage> {
        loop {
            let index = state
                .messages
                .iter()
                .position(|m| m.invisible_until.map_or(true, |until| until <= now))?;

            if state.messages[index].receive_count >= self.max_receive_count {
                if let Some(message) = state.messages.remove(index) {
                    warn!(
                        message_id = %message.id,
                        receive_count = message.receive_count,
                        "message exceeded max receive count, moved to dead-letter queue"
                    );
                    state.dead_letters.push(message);
                }
                continue;
            }

            let message = &mut state.messages[index];
            let receipt = Uuid::new_v4().to_string();
            message.receive_count += 1;
            message.invisible_until = Some(now + self.visibility_timeout);
            message.receipt_handle = Some(receipt.clone());

            return Some(ReceivedMessage {
                message_id: message.id.clone(),
                receipt_handle: receipt,
                body: message.body.clone(),
                attributes: message.attributes.clone(),
                receive_count: message.receive_count,
            });
        }
    }
}

impl QueueTransport for InMemoryTransport {
    fn send(&self, message: OutgoingMessage) -> Result<String, TransportError> {
        let mut state = self.state()?;
        Self::check_available(&state)?;

        let id = Uuid::new_v4().to_string();
        state.messages.push_back(StoredMessage {
            id: id.clone(),
            body: message.body,
            attributes: message.attributes,
            receive_count: 0,
            invisible_until: None,
            receipt_handle: None,
        });
        self.shared.1.notify_one();
        Ok(id)
    }

    fn receive(&self, wait: Duration) -> Result<Option<ReceivedMessage>, TransportError> {
        // `None` when the wait is too long to represent: block until a send.
        let deadline = Instant::now().checked_add(wait);
        let mut state = self.state()?;
        loop {
            Self::check_available(&state)?;

            let now = Instant::now();
            if let Some(message) = self.next_visible(&mut state, now) {
                return Ok(Some(message));
            }
            if deadline.is_some_and(|d| now >= d) {
                return Ok(None);
            }

            // Wake up early enough to notice a visibility timeout expiring.
            let wake_at = state
                .messages
                .iter()
                .filter_map(|m| m.invisible_until)
                .chain(deadline)
                .min();
            let ready = &self.shared.1;
            state = match wake_at {
                Some(at) => {
                    let timeout = at.saturating_duration_since(now);
                    ready
                        .wait_timeout(state, timeout.max(Duration::from_millis(1)))
                        .map(|(guard, _)| guard)
                        .map_err(|_| TransportError::LockPoisoned("transport"))?
                }
                None => ready
                    .wait(state)
                    .map_err(|_| TransportError::LockPoisoned("transport"))?,
            };
        }
    }

    fn delete(&self, receipt_handle: &str) -> Result<(), TransportError> {
        let mut state = self.state()?;
        Self::check_available(&state)?;

        let index = state
            .messages
            .iter()
            .position(|m| m.receipt_handle.as_deref() == Some(receipt_handle))
            .ok_or_else(|| TransportError::UnknownReceipt(receipt_handle.to_string()))?;
        state.messages.remove(index);
        Ok(())
    }
}
