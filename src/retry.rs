use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How long to wait before the next attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RetryPolicy {
    /// Same delay every time.
    Fixed { delay_ms: u64 },
    /// `base * 2^(attempt - 1)`, capped at `max`.
    Exponential { base_ms: u64, max_ms: u64 },
}

impl RetryPolicy {
    pub fn fixed(delay: Duration) -> Self {
        RetryPolicy::Fixed {
            delay_ms: duration_ms(delay),
        }
    }

    pub fn exponential(base: Duration, max: Duration) -> Self {
        RetryPolicy::Exponential {
            base_ms: duration_ms(base),
            max_ms: duration_ms(max),
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match *self {
            RetryPolicy::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            RetryPolicy::Exponential { base_ms, max_ms } => {
                let exponent = attempt.saturating_sub(1).min(32);
                let delay = base_ms.saturating_mul(1u64 << exponent);
                Duration::from_millis(delay.min(max_ms))
            }
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
