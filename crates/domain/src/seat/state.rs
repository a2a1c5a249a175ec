//! Seat availability state machine.

use serde::{Deserialize, Serialize};

/// Availability of one seat for one event.
///
/// State transitions:
/// ```text
/// Available ──► Reserved ──► Sold
///     ▲            │
///     └────────────┘  (release, or lazy expiry on the next reserve)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SeatStatus {
    /// Free to reserve.
    #[default]
    Available,

    /// Held for a booking until `reserved_until`.
    Reserved,

    /// Paid for (terminal within this system).
    Sold,
}

impl SeatStatus {
    /// Returns true if the seat is bound to a booking in this state.
    pub fn is_bound(&self) -> bool {
        matches!(self, SeatStatus::Reserved | SeatStatus::Sold)
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SeatStatus::Available => "Available",
            SeatStatus::Reserved => "Reserved",
            SeatStatus::Sold => "Sold",
        }
    }
}

impl std::fmt::Display for SeatStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SeatStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Available" => Ok(SeatStatus::Available),
            "Reserved" => Ok(SeatStatus::Reserved),
            "Sold" => Ok(SeatStatus::Sold),
            other => Err(format!("unknown seat status: {other}")),
        }
    }
}
