use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{BookingId, EventId, SeatId, UserId};
use domain::{Booking, SeatAvailability};

use crate::Result;

/// Seat availability access inside a transaction.
///
/// Rows returned by [`lock_seats_for_update`](Self::lock_seats_for_update)
/// stay exclusively locked until the transaction commits or rolls back.
#[async_trait]
pub trait SeatStatusStore: Send {
    /// Locks the availability rows for `seat_ids` of `event_id`.
    ///
    /// All locks are taken in one batched call, in ascending seat order.
    /// Seats without a row are silently absent from the result; callers
    /// compare lengths to detect them. Duplicate ids are collapsed.
    async fn lock_seats_for_update(
        &mut self,
        event_id: EventId,
        seat_ids: &[SeatId],
    ) -> Result<Vec<SeatAvailability>>;

    /// Writes back a seat previously locked by this transaction.
    async fn update_seat(&mut self, seat: &SeatAvailability) -> Result<()>;

    /// Inserts the row unless one already exists for `(event, seat)`.
    ///
    /// Returns true if the row was created.
    async fn insert_seat_if_absent(&mut self, seat: &SeatAvailability) -> Result<bool>;
}

/// Booking access inside a transaction.
#[async_trait]
pub trait BookingRepository: Send {
    /// Loads and locks a booking so concurrent handlers for the same booking
    /// serialize.
    async fn lock_booking(&mut self, booking_id: BookingId) -> Result<Option<Booking>>;

    /// Stores a new booking together with its booked seats.
    async fn insert_booking(&mut self, booking: &Booking) -> Result<()>;

    /// Writes back a booking inserted or locked by this transaction.
    async fn update_booking(&mut self, booking: &Booking) -> Result<()>;
}

/// A unit of work with Serializable isolation.
///
/// Dropping a transaction without committing discards its writes and
/// releases its locks.
#[async_trait]
pub trait StoreTransaction: SeatStatusStore + BookingRepository + Sized {
    /// Applies all writes atomically and releases the locks.
    async fn commit(self) -> Result<()>;

    /// Discards all writes and releases the locks.
    async fn rollback(self) -> Result<()>;
}

/// Core trait for booking store implementations.
///
/// All implementations must be thread-safe (Send + Sync). Reads outside a
/// transaction see committed state only.
#[async_trait]
pub trait BookingStore: Send + Sync {
    /// The transaction type handed out by [`begin`](Self::begin).
    type Transaction: StoreTransaction;

    /// Opens a Serializable transaction.
    async fn begin(&self) -> Result<Self::Transaction>;

    /// Retrieves a booking by id.
    async fn get_booking(&self, booking_id: BookingId) -> Result<Option<Booking>>;

    /// Retrieves all bookings of a user, newest first.
    async fn bookings_for_user(&self, user_id: UserId) -> Result<Vec<Booking>>;

    /// Retrieves one seat availability row.
    async fn get_seat(&self, event_id: EventId, seat_id: SeatId)
    -> Result<Option<SeatAvailability>>;

    /// Retrieves all seat availability rows of an event, ordered by seat.
    async fn seats_for_event(&self, event_id: EventId) -> Result<Vec<SeatAvailability>>;

    /// Retrieves PendingPayment bookings whose hold ended before `cutoff`,
    /// oldest first.
    async fn pending_bookings_expired_before(&self, cutoff: DateTime<Utc>)
    -> Result<Vec<Booking>>;
}

/// Sorts and deduplicates seat ids into lock acquisition order.
pub(crate) fn lock_order(seat_ids: &[SeatId]) -> Vec<SeatId> {
    let mut ordered = seat_ids.to_vec();
    ordered.sort_unstable();
    ordered.dedup();
    ordered
}
