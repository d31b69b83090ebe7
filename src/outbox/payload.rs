use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::warn;

use crate::order::OrderId;

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("payload has no orderId")]
    MissingOrderId,

    #[error("payload orderId {0:?} is not a valid id")]
    InvalidOrderId(String),
}

/// Body of the order-created signal: `{"orderId": "...", "correlationId": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreatedPayload {
    pub order_id: OrderId,
    pub correlation_id: Option<String>,
}

impl OrderCreatedPayload {
    pub fn new(order_id: OrderId, correlation_id: Option<&str>) -> Self {
        Self {
            order_id,
            correlation_id: normalize_correlation(correlation_id),
        }
    }

    pub fn to_json(&self) -> String {
        json!({
            "orderId": self.order_id.to_string(),
            "correlationId": self.correlation_id,
        })
        .to_string()
    }

    /// Parse a body received from a queue or an outbox row.
    ///
    /// Only `orderId` is required; a missing, null or blank `correlationId`
    /// is treated as absent.
    pub fn parse(body: &str) -> Result<Self, PayloadError> {
        let value: Value = serde_json::from_str(body)?;
        let raw = value
            .get("orderId")
            .and_then(Value::as_str)
            .ok_or(PayloadError::MissingOrderId)?;
        let order_id = raw
            .parse()
            .map_err(|_| PayloadError::InvalidOrderId(raw.to_string()))?;

        Ok(Self {
            order_id,
            correlation_id: normalize_correlation(
                value.get("correlationId").and_then(Value::as_str),
            ),
        })
    }
}

/// Read the correlation id out of an outbox payload.
///
/// Malformed payloads are logged and yield `None`; a broken correlation id
/// never blocks processing.
pub fn correlation_id_from_payload(payload: &str) -> Option<String> {
    if payload.trim().is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(payload) {
        Ok(value) => normalize_correlation(value.get("correlationId").and_then(Value::as_str)),
        Err(error) => {
            warn!(%error, "failed to parse correlation id from outbox payload");
            None
        }
    }
}

fn normalize_correlation(correlation_id: Option<&str>) -> Option<String> {
    correlation_id
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn serializes_with_camel_case_keys() {
        let id = OrderId::new();
        let json = OrderCreatedPayload::new(id, Some("corr-7")).to_json();
        let value: Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["orderId"], id.to_string());
        assert_eq!(value["correlationId"], "corr-7");
    }

    #[test]
    fn missing_correlation_serializes_as_null() {
        let json = OrderCreatedPayload::new(OrderId::new(), Some("  ")).to_json();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert!(value["correlationId"].is_null());
    }

    #[test]
    fn parse_reads_order_id_and_correlation() {
        let id = OrderId::new();
        let body = format!(r#"{{"orderId":"{id}","correlationId":"abc"}}"#);
        let payload = OrderCreatedPayload::parse(&body).unwrap();

        assert_eq!(payload.order_id, id);
        assert_eq!(payload.correlation_id.as_deref(), Some("abc"));
    }

    #[test]
    fn parse_accepts_bare_order_id() {
        let id = OrderId::new();
        let payload = OrderCreatedPayload::parse(&format!(r#"{{"orderId":"{id}"}}"#)).unwrap();
        assert_eq!(payload.order_id, id);
        assert!(payload.correlation_id.is_none());
    }

    #[test]
    fn parse_rejects_bad_bodies() {
        assert!(matches!(
            OrderCreatedPayload::parse("not json"),
            Err(PayloadError::Json(_))
        ));
        assert!(matches!(
            OrderCreatedPayload::parse(r#"{"id":"x"}"#),
            Err(PayloadError::MissingOrderId)
        ));
        assert!(matches!(
            OrderCreatedPayload::parse(r#"{"orderId":"nope"}"#),
            Err(PayloadError::InvalidOrderId(_))
        ));
    }

    #[test]
    #[traced_test]
    fn malformed_payload_yields_no_correlation_and_warns() {
        assert_eq!(correlation_id_from_payload("{broken"), None);
        assert!(logs_contain("failed to parse correlation id"));
    }

    #[test]
    fn correlation_is_read_from_valid_payload() {
        let json = OrderCreatedPayload::new(OrderId::new(), Some("c-1")).to_json();
        assert_eq!(correlation_id_from_payload(&json).as_deref(), Some("c-1"));
        assert_eq!(correlation_id_from_payload(""), None);
    }
}
