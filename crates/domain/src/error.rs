//! Domain error types.

use thiserror::Error;

use crate::booking::BookingError;
use crate::seat::SeatError;

/// An aggregate method was invoked from a state that does not allow it.
///
/// These are invariant violations: the enclosing transaction must be rolled
/// back and the error logged.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A seat availability transition was rejected.
    #[error("Seat error: {0}")]
    Seat(#[from] SeatError),

    /// A booking transition was rejected.
    #[error("Booking error: {0}")]
    Booking(#[from] BookingError),
}
