//! Domain layer for the seat booking system.
//!
//! This crate holds the two state machines the booking saga relies on:
//! - [`SeatAvailability`]: per `(event, seat)` availability with lazy expiry
//! - [`Booking`]: the purchase intent and its payment lifecycle
//!
//! Nothing in here performs I/O. Fields are private and only change through
//! the transition methods, which reject invalid transitions with a
//! [`DomainError`].

pub mod booking;
pub mod error;
pub mod seat;

pub use booking::{BookedSeat, Booking, BookingError, BookingRecord, BookingStatus, Transition};
pub use error::DomainError;
pub use seat::{ReleaseOutcome, SeatAvailability, SeatError, SeatStatus};
