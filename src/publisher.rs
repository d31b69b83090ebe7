//! Announcing that an order needs processing.
//!
//! The outbox variant writes inside the caller's transaction. The other two
//! must not run until that transaction has committed, so staging them
//! returns a [`SideEffect`] that the caller hands to
//! [`EventPublisher::commit_and_dispatch`].

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error};

use crate::config::PublishMode;
use crate::error::{PipelineError, PipelineResult};
use crate::order::OrderId;
use crate::outbox::{OrderCreatedPayload, OutboxEvent};
use crate::queue::InMemoryOrderQueue;
use crate::store::{OutboxRepository, StoreError, Transaction};
use crate::transport::{OutgoingMessage, QueueTransport};

/// Work to do once the surrounding transaction has committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideEffect {
    SignalOrder {
        order_id: OrderId,
        correlation_id: Option<String>,
    },
}

/// A use case's result together with its post-commit side effects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Staged<T> {
    pub value: T,
    pub side_effects: Vec<SideEffect>,
}

impl<T> Staged<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            side_effects: Vec::new(),
        }
    }

    pub fn with_effect(mut self, effect: Option<SideEffect>) -> Self {
        self.side_effects.extend(effect);
        self
    }
}

/// Where order-created signals go. Chosen once at startup.
#[derive(Clone)]
pub enum EventPublisher {
    InMemory(InMemoryOrderQueue),
    Outbox,
    Transport(Arc<dyn QueueTransport>),
}

impl fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EventPublisher").field(&self.mode()).finish()
    }
}

impl EventPublisher {
    pub fn mode(&self) -> PublishMode {
        match self {
            EventPublisher::InMemory(_) => PublishMode::InMemory,
            EventPublisher::Outbox => PublishMode::Outbox,
            EventPublisher::Transport(_) => PublishMode::Transport,
        }
    }

    /// Record that `order_id` has work pending.
    ///
    /// Outbox mode enqueues a row in `tx` and returns `None`. The other modes
    /// touch nothing and return the signal to send after commit.
    pub fn publish_order_created<R>(
        &self,
        tx: &mut R,
        order_id: OrderId,
        correlation_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<SideEffect>, StoreError>
    where
        R: OutboxRepository + ?Sized,
    {
        match self {
            EventPublisher::Outbox => {
                tx.enqueue(OutboxEvent::order_created(order_id, correlation_id, now))?;
                Ok(None)
            }
            EventPublisher::InMemory(_) | EventPublisher::Transport(_) => {
                Ok(Some(SideEffect::SignalOrder {
                    order_id,
                    correlation_id: correlation_id.map(str::to_string),
                }))
            }
        }
    }

    /// Carry out one post-commit side effect.
    pub fn dispatch(&self, effect: &SideEffect) -> PipelineResult<()> {
        let SideEffect::SignalOrder {
            order_id,
            correlation_id,
        } = effect;

        match self {
            EventPublisher::InMemory(queue) => {
                queue.publish(*order_id);
                debug!(%order_id, "order queued in memory");
            }
            EventPublisher::Transport(transport) => {
                let body = OrderCreatedPayload::new(*order_id, correlation_id.as_deref()).to_json();
                let message =
                    OutgoingMessage::new(body).with_correlation_id(correlation_id.as_deref());
                let message_id = transport.send(message)?;
                debug!(%order_id, %message_id, "order sent to transport");
            }
            // Outbox rows are written inside the transaction; nothing is deferred.
            EventPublisher::Outbox => {}
        }
        Ok(())
    }

    /// Commit `tx`, then dispatch the staged side effects.
    ///
    /// A failed commit dispatches nothing. A dispatch failure after a
    /// successful commit is reported as [`PipelineError::PublishAfterCommit`].
    pub fn commit_and_dispatch<Tx, T>(&self, tx: Tx, staged: Staged<T>) -> PipelineResult<T>
    where
        Tx: Transaction,
    {
        tx.commit()?;
        for effect in &staged.side_effects {
            if let Err(source) = self.dispatch(effect) {
                let SideEffect::SignalOrder { order_id, .. } = effect;
                error!(%order_id, error = %source, "failed to publish after commit");
                return Err(PipelineError::PublishAfterCommit {
                    order_id: *order_id,
                    source: Box::new(source),
                });
            }
        }
        Ok(staged.value)
    }
}
