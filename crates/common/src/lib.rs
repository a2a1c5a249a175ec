//! Shared types for the seat booking system.
//!
//! Everything here is plain data: typed identifiers, money in minor units
//! and the clock abstraction that lazy reservation expiry is evaluated against.

pub mod clock;
pub mod money;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use money::Money;
pub use types::{BookingId, EventId, SeatId, UserId, VenueId};
