//! The downstream step an order goes through.

use std::thread;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tracing::debug;

use crate::order::OrderId;

/// A failed processing attempt. The message becomes the order's failure
/// reason.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ProcessorError(pub String);

impl ProcessorError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }

    pub fn reason(&self) -> &str {
        &self.0
    }
}

/// Performs the actual work for an order. Called at least once per order,
/// possibly more than once, so implementations should tolerate repeats.
pub trait OrderProcessor: Send + Sync {
    fn process(&self, order_id: OrderId) -> Result<(), ProcessorError>;
}

impl<F> OrderProcessor for F
where
    F: Fn(OrderId) -> Result<(), ProcessorError> + Send + Sync,
{
    fn process(&self, order_id: OrderId) -> Result<(), ProcessorError> {
        self(order_id)
    }
}

/// Stand-in processor that sleeps and fails at random.
#[derive(Debug, Clone)]
pub struct SimulatedOrderProcessor {
    failure_probability: f64,
    delay: Duration,
}

impl Default for SimulatedOrderProcessor {
    fn default() -> Self {
        Self {
            failure_probability: 0.0,
            delay: Duration::from_millis(500),
        }
    }
}

impl SimulatedOrderProcessor {
    pub fn new(failure_probability: f64, delay: Duration) -> Self {
        Self {
            failure_probability: failure_probability.clamp(0.0, 1.0),
            delay,
        }
    }
}

impl OrderProcessor for SimulatedOrderProcessor {
    fn process(&self, order_id: OrderId) -> Result<(), ProcessorError> {
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        if self.failure_probability > 0.0 && rand::thread_rng().gen_bool(self.failure_probability) {
            debug!(%order_id, "simulated processing failure");
            return Err(ProcessorError::new("simulated failure"));
        }
        Ok(())
    }
}
