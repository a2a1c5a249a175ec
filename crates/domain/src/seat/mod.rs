//! Seat availability aggregate and related types.

mod availability;
mod state;

pub use availability::{ReleaseOutcome, SeatAvailability};
pub use state::SeatStatus;

use common::{BookingId, SeatId};
use thiserror::Error;

/// Errors raised by seat availability transitions.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SeatError {
    /// The seat is held or sold and its hold has not lapsed.
    #[error("Seat {seat_id} is not available (status {status})")]
    Unavailable { seat_id: SeatId, status: SeatStatus },

    /// Only the booking currently holding the reservation may finalize it.
    #[error("Seat {seat_id} is not reserved by booking {booking_id} (status {status})")]
    NotHeldByBooking {
        seat_id: SeatId,
        booking_id: BookingId,
        status: SeatStatus,
    },

    /// Sold seats cannot be released.
    #[error("Seat {seat_id} is sold and cannot be made available")]
    AlreadySold { seat_id: SeatId },

    /// A persisted row violates the availability invariants.
    #[error("Inconsistent seat row for {seat_id}: {reason}")]
    Inconsistent { seat_id: SeatId, reason: &'static str },
}
