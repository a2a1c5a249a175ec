//! Persistence for seat availability and bookings.
//!
//! The [`BookingStore`] trait opens transactions; a [`StoreTransaction`]
//! exposes the seat lock/update contract and the booking repository, and
//! applies everything atomically on commit. Two engines are provided:
//! - [`InMemoryBookingStore`]: per-row async locks, buffered writes
//! - [`PostgresBookingStore`]: Serializable transactions with `FOR UPDATE`

pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::{InMemoryBookingStore, InMemoryTransaction};
pub use postgres::{PostgresBookingStore, PostgresTransaction};
pub use store::{BookingRepository, BookingStore, SeatStatusStore, StoreTransaction};
