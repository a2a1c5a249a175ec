//! Booking aggregate and related types.

mod aggregate;
mod state;

pub use aggregate::{BookedSeat, Booking, BookingRecord, Transition};
pub use state::BookingStatus;

use common::BookingId;
use thiserror::Error;

/// Errors that can occur during booking operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BookingError {
    /// Booking is not in a status that allows the action.
    #[error("Invalid transition for booking {booking_id}: cannot {action} from {current}")]
    InvalidTransition {
        booking_id: BookingId,
        current: BookingStatus,
        action: &'static str,
    },

    /// The seat total no longer fits in the money representation.
    #[error("Total price overflow on booking {booking_id}")]
    PriceOverflow { booking_id: BookingId },

    /// A persisted booking violates the aggregate invariants.
    #[error("Inconsistent booking {booking_id}: {reason}")]
    Inconsistent {
        booking_id: BookingId,
        reason: &'static str,
    },
}
