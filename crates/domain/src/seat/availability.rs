//! Seat availability aggregate.

use chrono::{DateTime, Utc};
use common::{BookingId, EventId, Money, SeatId};
use serde::{Deserialize, Serialize};

use super::{SeatError, SeatStatus};

/// Result of [`SeatAvailability::make_available`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The seat went back to Available.
    Released,

    /// The seat is bound to a different booking; nothing changed.
    Skipped,
}

/// Availability record for one seat of one event.
///
/// Identity is the `(event_id, seat_id)` pair. Invariants:
/// - `reserved_until` is set iff the status is Reserved
/// - `current_booking_id` is set iff the status is Reserved or Sold
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatAvailability {
    event_id: EventId,
    seat_id: SeatId,
    status: SeatStatus,
    reserved_until: Option<DateTime<Utc>>,
    current_booking_id: Option<BookingId>,
    seat_price: Money,
}

impl SeatAvailability {
    /// Creates a fresh Available row, as done when an event is approved.
    pub fn available(event_id: EventId, seat_id: SeatId, seat_price: Money) -> Self {
        Self {
            event_id,
            seat_id,
            status: SeatStatus::Available,
            reserved_until: None,
            current_booking_id: None,
            seat_price,
        }
    }

    /// Rehydrates a row loaded from storage, checking the invariants.
    pub fn restore(
        event_id: EventId,
        seat_id: SeatId,
        status: SeatStatus,
        reserved_until: Option<DateTime<Utc>>,
        current_booking_id: Option<BookingId>,
        seat_price: Money,
    ) -> Result<Self, SeatError> {
        if reserved_until.is_some() != (status == SeatStatus::Reserved) {
            return Err(SeatError::Inconsistent {
                seat_id,
                reason: "reserved_until must be set exactly when reserved",
            });
        }
        if current_booking_id.is_some() != status.is_bound() {
            return Err(SeatError::Inconsistent {
                seat_id,
                reason: "current_booking_id must be set exactly when reserved or sold",
            });
        }

        Ok(Self {
            event_id,
            seat_id,
            status,
            reserved_until,
            current_booking_id,
            seat_price,
        })
    }
}

// Query methods
impl SeatAvailability {
    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    pub fn seat_id(&self) -> SeatId {
        self.seat_id
    }

    pub fn status(&self) -> SeatStatus {
        self.status
    }

    pub fn reserved_until(&self) -> Option<DateTime<Utc>> {
        self.reserved_until
    }

    pub fn current_booking_id(&self) -> Option<BookingId> {
        self.current_booking_id
    }

    /// Price snapshot taken at the last reservation (or at seeding).
    pub fn seat_price(&self) -> Money {
        self.seat_price
    }

    /// Returns true if the seat is Reserved and bound to `booking_id`.
    pub fn is_reserved_by(&self, booking_id: BookingId) -> bool {
        self.status == SeatStatus::Reserved && self.current_booking_id == Some(booking_id)
    }

    /// Returns true if the seat can be reserved at `now`.
    ///
    /// A Reserved seat whose hold ended strictly before `now` counts as
    /// available. Nothing sweeps expired holds; they are reclaimed here.
    pub fn is_available_or_expired(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            SeatStatus::Available => true,
            SeatStatus::Reserved => self.reserved_until.is_some_and(|until| until < now),
            SeatStatus::Sold => false,
        }
    }
}

// Transition methods
impl SeatAvailability {
    /// Holds the seat for `booking_id` until `until`.
    ///
    /// An expired hold from another booking is overwritten.
    pub fn reserve(
        &mut self,
        booking_id: BookingId,
        until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), SeatError> {
        if !self.is_available_or_expired(now) {
            return Err(SeatError::Unavailable {
                seat_id: self.seat_id,
                status: self.status,
            });
        }

        self.status = SeatStatus::Reserved;
        self.reserved_until = Some(until);
        self.current_booking_id = Some(booking_id);
        Ok(())
    }

    /// Finalizes the sale for the booking that currently holds the seat.
    pub fn sell(&mut self, booking_id: BookingId) -> Result<(), SeatError> {
        if !self.is_reserved_by(booking_id) {
            return Err(SeatError::NotHeldByBooking {
                seat_id: self.seat_id,
                booking_id,
                status: self.status,
            });
        }

        self.status = SeatStatus::Sold;
        self.reserved_until = None;
        Ok(())
    }

    /// Releases the seat back to Available.
    ///
    /// Sold seats are never released. When `expected_booking_id` is given and
    /// the seat has moved on to another booking, this is a no-op.
    pub fn make_available(
        &mut self,
        expected_booking_id: Option<BookingId>,
    ) -> Result<ReleaseOutcome, SeatError> {
        if self.status == SeatStatus::Sold {
            return Err(SeatError::AlreadySold {
                seat_id: self.seat_id,
            });
        }

        if let Some(expected) = expected_booking_id
            && self.current_booking_id != Some(expected)
        {
            return Ok(ReleaseOutcome::Skipped);
        }

        self.status = SeatStatus::Available;
        self.reserved_until = None;
        self.current_booking_id = None;
        Ok(ReleaseOutcome::Released)
    }

    /// Records the current list price ahead of a reservation.
    pub fn snapshot_price(&mut self, price: Money, now: DateTime<Utc>) -> Result<(), SeatError> {
        if !self.is_available_or_expired(now) {
            return Err(SeatError::Unavailable {
                seat_id: self.seat_id,
                status: self.status,
            });
        }
        self.seat_price = price;
        Ok(())
    }
}
