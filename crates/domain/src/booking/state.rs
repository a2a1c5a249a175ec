//! Booking lifecycle state machine.

use serde::{Deserialize, Serialize};

/// The status of a booking in its lifecycle.
///
/// State transitions:
/// ```text
/// PendingPayment ──┬──► Confirmed
///                  ├──► Failed
///                  └──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum BookingStatus {
    /// Seats are held, waiting for the payment outcome.
    #[default]
    PendingPayment,

    /// Payment succeeded (terminal state).
    Confirmed,

    /// Payment failed (terminal state).
    Failed,

    /// Cancelled outside the payment flow (terminal state).
    Cancelled,
}

impl BookingStatus {
    /// Returns true if seats can still be added in this status.
    pub fn can_add_seats(&self) -> bool {
        matches!(self, BookingStatus::PendingPayment)
    }

    /// Returns true if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BookingStatus::PendingPayment)
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::PendingPayment => "PendingPayment",
            BookingStatus::Confirmed => "Confirmed",
            BookingStatus::Failed => "Failed",
            BookingStatus::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PendingPayment" => Ok(BookingStatus::PendingPayment),
            "Confirmed" => Ok(BookingStatus::Confirmed),
            "Failed" => Ok(BookingStatus::Failed),
            "Cancelled" => Ok(BookingStatus::Cancelled),
            other => Err(format!("unknown booking status: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_pending_payment() {
        assert_eq!(BookingStatus::default(), BookingStatus::PendingPayment);
    }

    #[test]
    fn terminal_statuses() {
        assert!(!BookingStatus::PendingPayment.is_terminal());
        assert!(BookingStatus::Confirmed.is_terminal());
        assert!(BookingStatus::Failed.is_terminal());
        assert!(BookingStatus::Cancelled.is_terminal());
    }

    #[test]
    fn only_pending_accepts_seats() {
        assert!(BookingStatus::PendingPayment.can_add_seats());
        assert!(!BookingStatus::Confirmed.can_add_seats());
        assert!(!BookingStatus::Failed.can_add_seats());
        assert!(!BookingStatus::Cancelled.can_add_seats());
    }

    #[test]
    fn display_and_parse() {
        assert_eq!(BookingStatus::PendingPayment.to_string(), "PendingPayment");
        assert_eq!(
            "Confirmed".parse::<BookingStatus>().unwrap(),
            BookingStatus::Confirmed
        );
        assert!("Paid".parse::<BookingStatus>().is_err());
    }
}
