//! Business-level dead-letter entries for orders that exhausted their retries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::order::OrderId;

/// Upper bound on how many entries a single listing returns.
pub const DLQ_LIST_MAX: usize = 200;

/// Page size used when the caller has no preference.
pub const DLQ_LIST_DEFAULT: usize = 50;

/// Snapshot of an order at the moment it was given up on.
///
/// At most one entry exists per order; it is removed when the order is
/// reprocessed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DlqEntry {
    pub order_id: OrderId,
    pub reason: String,
    pub retry_count: u32,
    pub failed_at: DateTime<Utc>,
}

/// Clamp a requested listing size to `1..=DLQ_LIST_MAX`.
pub fn clamp_list_limit(limit: usize) -> usize {
    limit.clamp(1, DLQ_LIST_MAX)
}
