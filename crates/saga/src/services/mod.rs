//! Collaborator services the saga talks to, with in-memory implementations.

pub mod bus;
pub mod pricing;

pub use bus::{InMemoryMessageBus, MessageBus};
pub use pricing::{InMemorySeatPriceLookup, SeatPriceLookup};
