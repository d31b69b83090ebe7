use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::OrderCreatedPayload;
use crate::order::OrderId;

/// Event type written when an order is created or reprocessed.
pub const ORDER_CREATED: &str = "OrderCreated";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    Pending,
    Processing,
    Processed,
    Failed,
}

/// Durable "work exists" signal, written in the same transaction as the
/// order change it announces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: EventId,
    pub aggregate_id: OrderId,
    pub event_type: String,
    pub payload: String,
    pub status: OutboxStatus,
    pub attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub locked_at: Option<DateTime<Utc>>,
    pub locked_by: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl OutboxEvent {
    /// A new row, eligible for claiming immediately.
    pub fn pending(
        aggregate_id: OrderId,
        event_type: impl Into<String>,
        payload: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EventId::new(),
            aggregate_id,
            event_type: event_type.into(),
            payload: payload.into(),
            status: OutboxStatus::Pending,
            attempts: 0,
            next_attempt_at: now,
            created_at: now,
            locked_at: None,
            locked_by: None,
            processed_at: None,
            last_error: None,
        }
    }

    pub fn order_created(
        order_id: OrderId,
        correlation_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Self {
        let payload = OrderCreatedPayload::new(order_id, correlation_id).to_json();
        Self::pending(order_id, ORDER_CREATED, payload, now)
    }

    /// Whether `claim_ready` may hand this row out at `now`.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.status == OutboxStatus::Pending && self.next_attempt_at <= now
    }

    pub(crate) fn lock(&mut self, locked_at: DateTime<Utc>, claimant: &str) {
        self.status = OutboxStatus::Processing;
        self.locked_at = Some(locked_at);
        self.locked_by = Some(claimant.to_string());
    }

    pub(crate) fn unlock(&mut self) {
        self.status = OutboxStatus::Pending;
        self.locked_at = None;
        self.locked_by = None;
    }
}

/// Rows still owed work, split by whether someone holds them.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OutboxBacklog {
    pub pending: usize,
    pub processing: usize,
}

impl OutboxBacklog {
    pub fn total(&self) -> usize {
        self.pending + self.processing
    }
}
