//! Tunables for the reservation use case and the message worker.

use std::time::Duration;

/// How long seats are held for a booking awaiting payment.
pub const DEFAULT_RESERVATION_TTL_SECS: i64 = 600;

/// Settings for [`ReservationOrchestrator`](crate::ReservationOrchestrator).
#[derive(Debug, Clone)]
pub struct ReservationSettings {
    pub reservation_ttl: chrono::Duration,
    pub currency: String,
    pub preferred_gateway: String,
    pub order_type: String,
    /// Attempts at the reservation transaction when the store reports a
    /// transient failure (lock timeout, serialization failure).
    pub max_transaction_attempts: u32,
    pub transaction_retry_backoff: Duration,
}

impl Default for ReservationSettings {
    fn default() -> Self {
        Self {
            reservation_ttl: chrono::Duration::seconds(DEFAULT_RESERVATION_TTL_SECS),
            currency: "VND".to_string(),
            preferred_gateway: "VnPay".to_string(),
            order_type: "other".to_string(),
            max_transaction_attempts: 3,
            transaction_retry_backoff: Duration::from_millis(25),
        }
    }
}

/// Redelivery policy for messages whose handler failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, doubling from `initial_backoff`.
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1 << exponent)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
        }
    }
}
