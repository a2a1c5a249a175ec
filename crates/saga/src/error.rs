//! Saga error types.

use booking_store::StoreError;
use common::{BookingId, EventId, SeatId};
use domain::DomainError;
use thiserror::Error;

/// Errors raised by the message bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// The broker refused or could not accept the message.
    #[error("Message bus unavailable: {0}")]
    Unavailable(String),

    /// The consuming side of the bus has shut down.
    #[error("Message bus closed")]
    Closed,

    /// The message could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by the seat price lookup.
#[derive(Debug, Error)]
pub enum PricingError {
    /// The pricing service could not be reached.
    #[error("Pricing service unavailable: {0}")]
    Unavailable(String),

    /// No price is known for the seat.
    #[error("No price for seat {seat_id} of event {event_id}")]
    NoPrice { event_id: EventId, seat_id: SeatId },
}

/// Errors returned by the reservation use case.
#[derive(Debug, Error)]
pub enum ReservationError {
    /// The request named no seats.
    #[error("At least one seat must be requested")]
    NoSeatsRequested,

    /// Some requested seats have no availability record for the event.
    #[error("Seats not found for event {event_id}: {seat_ids:?}")]
    SeatsNotFound {
        event_id: EventId,
        seat_ids: Vec<SeatId>,
    },

    /// Some requested seats are reserved or sold.
    #[error("Seats unavailable for event {event_id}: {seat_ids:?}")]
    SeatsUnavailable {
        event_id: EventId,
        seat_ids: Vec<SeatId>,
    },

    /// The price snapshot could not be taken.
    #[error("Pricing unavailable: {0}")]
    PricingUnavailable(#[source] PricingError),

    /// An aggregate rejected a transition.
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Storage failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The booking was committed but its payment request never left.
    #[error("Booking {booking_id} committed but payment request was not published: {source}")]
    PaymentRequestNotPublished {
        booking_id: BookingId,
        #[source]
        source: BusError,
    },
}

impl ReservationError {
    /// Returns true if retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ReservationError::Store(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Errors that can occur while handling saga messages.
///
/// Business disagreements (duplicates, races) are reported as
/// [`HandlerOutcome`](crate::HandlerOutcome) values, never as errors.
#[derive(Debug, Error)]
pub enum SagaError {
    /// An aggregate rejected a transition.
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Storage failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl SagaError {
    /// Returns true if redelivering the message may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SagaError::Store(e) => e.is_transient(),
            SagaError::Domain(_) => false,
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_store_errors_are_retryable() {
        let transient = SagaError::Store(StoreError::Transient("lock timeout".into()));
        assert!(transient.is_retryable());

        let missing = SagaError::Store(StoreError::BookingNotFound(BookingId::new()));
        assert!(!missing.is_retryable());
    }

    #[test]
    fn unavailable_seats_are_listed_in_message() {
        let seat = SeatId::new();
        let err = ReservationError::SeatsUnavailable {
            event_id: EventId::new(),
            seat_ids: vec![seat],
        };
        assert!(err.to_string().contains(&seat.to_string()));
        assert!(!err.is_transient());
    }
}
