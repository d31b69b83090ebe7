use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::TransitionError;

/// Reason recorded when a failure is reported without one.
pub const UNKNOWN_REASON: &str = "unknown";

/// Opaque, globally unique order identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(Uuid);

impl OrderId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for OrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for OrderId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Processing,
    Processed,
    Failed,
}

impl OrderStatus {
    /// PROCESSED and FAILED are never left automatically.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Processed | OrderStatus::Failed)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Processed => "PROCESSED",
            OrderStatus::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// An order and its processing lifecycle.
///
/// State changes only through the named transition methods; each one checks
/// the current status and returns a [`TransitionError`] when the move is not
/// allowed. `updated_at` is stamped on every transition and never moves
/// backwards, even when a caller passes an older clock reading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    status: OrderStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    retry_count: u32,
    failure_reason: Option<String>,
}

impl Order {
    /// A fresh order waiting to be processed.
    pub fn new_pending(id: OrderId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
            retry_count: 0,
            failure_reason: None,
        }
    }

    /// Rehydrate an order from storage without running any transition.
    pub fn restore(
        id: OrderId,
        status: OrderStatus,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        retry_count: u32,
        failure_reason: Option<String>,
    ) -> Self {
        Self {
            id,
            status,
            created_at,
            updated_at: updated_at.max(created_at),
            retry_count,
            failure_reason,
        }
    }

    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    /// PENDING -> PROCESSING. Clears any reason left by a previous attempt.
    pub fn mark_processing(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.expect_status(OrderStatus::Pending, "start processing")?;
        self.status = OrderStatus::Processing;
        self.failure_reason = None;
        self.touch(now);
        Ok(())
    }

    /// PROCESSING -> PROCESSED.
    pub fn mark_processed(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.expect_status(OrderStatus::Processing, "complete")?;
        self.status = OrderStatus::Processed;
        self.touch(now);
        Ok(())
    }

    /// PROCESSING -> FAILED, counting the attempt.
    pub fn mark_failed(&mut self, reason: &str, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.expect_status(OrderStatus::Processing, "fail")?;
        self.status = OrderStatus::Failed;
        self.retry_count += 1;
        self.failure_reason = Some(normalize_reason(reason));
        self.touch(now);
        Ok(())
    }

    /// PROCESSING -> PENDING, counting the attempt so it can be retried.
    pub fn mark_retryable_failure(
        &mut self,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.expect_status(OrderStatus::Processing, "schedule a retry for")?;
        self.status = OrderStatus::Pending;
        self.retry_count += 1;
        self.failure_reason = Some(normalize_reason(reason));
        self.touch(now);
        Ok(())
    }

    /// FAILED -> PENDING for a manual reprocess. `retry_count` is kept.
    pub fn reset_to_pending(
        &mut self,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.expect_status(OrderStatus::Failed, "reset")?;
        self.status = OrderStatus::Pending;
        self.failure_reason = Some(reason.to_string());
        self.touch(now);
        Ok(())
    }

    fn expect_status(
        &self,
        expected: OrderStatus,
        transition: &'static str,
    ) -> Result<(), TransitionError> {
        if self.status == expected {
            Ok(())
        } else {
            Err(TransitionError {
                order_id: self.id,
                transition,
                from: self.status,
            })
        }
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = self.updated_at.max(now);
    }
}

fn normalize_reason(reason: &str) -> String {
    let trimmed = reason.trim();
    if trimmed.is_empty() {
        UNKNOWN_REASON.to_string()
    } else {
        trimmed.to_string()
    }
}
