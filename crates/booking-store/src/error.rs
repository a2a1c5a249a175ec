use common::{BookingId, EventId, SeatId};
use domain::DomainError;
use thiserror::Error;

/// SQLSTATE codes that signal a retryable conflict rather than a bug:
/// serialization failure, deadlock detected, lock not available.
const TRANSIENT_SQLSTATES: [&str; 3] = ["40001", "40P01", "55P03"];

/// Errors that can occur when interacting with the booking store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Lock timeout, serialization failure or similar. Safe to retry.
    #[error("Transient storage failure: {0}")]
    Transient(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A stored value could not be decoded.
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// A stored row violates the aggregate invariants.
    #[error("Stored row violates domain invariants: {0}")]
    Domain(#[from] DomainError),

    /// The booking does not exist.
    #[error("Booking not found: {0}")]
    BookingNotFound(BookingId),

    /// A booking with this id was already stored.
    #[error("Booking already exists: {0}")]
    DuplicateBooking(BookingId),

    /// A seat write was attempted without holding its row lock.
    #[error("Seat {seat_id} of event {event_id} is not locked by this transaction")]
    SeatNotLocked { event_id: EventId, seat_id: SeatId },

    /// A booking write was attempted without holding its row lock.
    #[error("Booking {0} is not locked by this transaction")]
    BookingNotLocked(BookingId),
}

impl StoreError {
    /// Returns true if the operation may succeed when retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = err
            && db_err
                .code()
                .is_some_and(|code| TRANSIENT_SQLSTATES.contains(&code.as_ref()))
        {
            return StoreError::Transient(db_err.message().to_string());
        }
        match err {
            sqlx::Error::PoolTimedOut => StoreError::Transient("connection pool timed out".into()),
            other => StoreError::Database(other),
        }
    }
}

/// Result type for booking store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
