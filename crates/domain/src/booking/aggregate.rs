//! Booking aggregate implementation.

use chrono::{DateTime, Duration, Utc};
use common::{BookingId, EventId, Money, SeatId, UserId};
use serde::{Deserialize, Serialize};

use super::{BookingError, BookingStatus};

/// Outcome of an idempotent status transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The status changed.
    Applied,

    /// The booking was already in the target (or another terminal) status.
    AlreadyInState,
}

/// A seat held by a booking, with the price paid for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookedSeat {
    seat_id: SeatId,
    price_at_booking: Money,
}

impl BookedSeat {
    pub fn new(seat_id: SeatId, price_at_booking: Money) -> Self {
        Self {
            seat_id,
            price_at_booking,
        }
    }

    pub fn seat_id(&self) -> SeatId {
        self.seat_id
    }

    pub fn price_at_booking(&self) -> Money {
        self.price_at_booking
    }
}

/// Persisted shape of a booking, used to rehydrate the aggregate.
#[derive(Debug, Clone)]
pub struct BookingRecord {
    pub id: BookingId,
    pub user_id: UserId,
    pub event_id: EventId,
    pub status: BookingStatus,
    pub total_price: Money,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub seats: Vec<BookedSeat>,
}

/// Booking aggregate root.
///
/// Created in PendingPayment inside the reservation transaction and moved to a
/// terminal status by the payment outcome handlers. Bookings are never
/// deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    id: BookingId,
    user_id: UserId,
    event_id: EventId,
    status: BookingStatus,
    /// Always equal to the sum of `seats[].price_at_booking`.
    total_price: Money,
    /// `None` once the booking is terminal.
    expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    seats: Vec<BookedSeat>,
}

impl Booking {
    /// Starts a new booking that holds its seats for `reservation_ttl`.
    pub fn new(
        user_id: UserId,
        event_id: EventId,
        reservation_ttl: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: BookingId::new(),
            user_id,
            event_id,
            status: BookingStatus::PendingPayment,
            total_price: Money::zero(),
            expires_at: Some(now + reservation_ttl),
            created_at: now,
            seats: Vec::new(),
        }
    }

    /// Rehydrates a booking loaded from storage.
    pub fn restore(record: BookingRecord) -> Result<Self, BookingError> {
        let booking_id = record.id;
        let sum = record
            .seats
            .iter()
            .try_fold(Money::zero(), |acc, s| acc.checked_add(s.price_at_booking))
            .ok_or(BookingError::PriceOverflow { booking_id })?;

        if sum != record.total_price {
            return Err(BookingError::Inconsistent {
                booking_id,
                reason: "total price does not match booked seats",
            });
        }
        if record.expires_at.is_some() == record.status.is_terminal() {
            return Err(BookingError::Inconsistent {
                booking_id,
                reason: "expires_at must be set exactly while pending payment",
            });
        }

        Ok(Self {
            id: record.id,
            user_id: record.user_id,
            event_id: record.event_id,
            status: record.status,
            total_price: record.total_price,
            expires_at: record.expires_at,
            created_at: record.created_at,
            seats: record.seats,
        })
    }
}

// Query methods
impl Booking {
    pub fn id(&self) -> BookingId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    pub fn status(&self) -> BookingStatus {
        self.status
    }

    pub fn total_price(&self) -> Money {
        self.total_price
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn seats(&self) -> &[BookedSeat] {
        &self.seats
    }

    /// Returns the ids of all booked seats, in booking order.
    pub fn seat_ids(&self) -> Vec<SeatId> {
        self.seats.iter().map(BookedSeat::seat_id).collect()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

// Transition methods
impl Booking {
    /// Adds a seat at its snapshot price.
    ///
    /// Returns `Ok(false)` if the seat is already part of the booking.
    pub fn add_seat(&mut self, seat_id: SeatId, price: Money) -> Result<bool, BookingError> {
        if !self.status.can_add_seats() {
            return Err(BookingError::InvalidTransition {
                booking_id: self.id,
                current: self.status,
                action: "add seat",
            });
        }

        if self.seats.iter().any(|s| s.seat_id == seat_id) {
            return Ok(false);
        }

        self.total_price = self
            .total_price
            .checked_add(price)
            .ok_or(BookingError::PriceOverflow {
                booking_id: self.id,
            })?;
        self.seats.push(BookedSeat::new(seat_id, price));
        Ok(true)
    }

    /// Marks the payment as received.
    ///
    /// Confirming twice is a no-op; confirming a failed or cancelled booking
    /// is rejected.
    pub fn confirm_payment(&mut self) -> Result<Transition, BookingError> {
        match self.status {
            BookingStatus::PendingPayment => {
                self.status = BookingStatus::Confirmed;
                self.expires_at = None;
                Ok(Transition::Applied)
            }
            BookingStatus::Confirmed => Ok(Transition::AlreadyInState),
            BookingStatus::Failed | BookingStatus::Cancelled => {
                Err(BookingError::InvalidTransition {
                    booking_id: self.id,
                    current: self.status,
                    action: "confirm payment",
                })
            }
        }
    }

    /// Marks the payment as failed. No-op once the booking is terminal.
    pub fn fail_payment(&mut self) -> Transition {
        if self.status.is_terminal() {
            return Transition::AlreadyInState;
        }

        self.status = BookingStatus::Failed;
        self.expires_at = None;
        Transition::Applied
    }
}
