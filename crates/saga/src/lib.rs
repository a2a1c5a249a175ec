//! Seat reservation saga.
//!
//! A booking moves through three transactions:
//! 1. [`ReservationOrchestrator`] locks and reserves seats, stores a
//!    PendingPayment booking and, after commit, publishes PaymentRequested
//! 2. the external Payment process answers with PaymentSucceeded or
//!    PaymentFailed
//! 3. [`PaymentOutcomeHandler`] confirms the booking and sells its seats, or
//!    fails it and releases them
//!
//! Seat rows are created by [`EventSeatSeeder`] when an event is approved.
//! [`MessageWorker`] feeds bus messages to the handlers with retry and
//! dead-lettering.

pub mod continuation;
pub mod error;
pub mod messages;
pub mod orchestrator;
pub mod reconciliation;
pub mod seeder;
pub mod services;
pub mod settings;
pub mod worker;

pub use continuation::{HandlerOutcome, PaymentOutcomeHandler};
pub use error::{BusError, PricingError, ReservationError, SagaError};
pub use messages::{BookingMessage, EventApproved, PaymentFailed, PaymentRequested, PaymentSucceeded};
pub use orchestrator::{BookingConfirmation, CreateBooking, ReservationOrchestrator};
pub use reconciliation::{DanglingBooking, DanglingBookingDetector};
pub use seeder::{EventSeatSeeder, SeedReport};
pub use services::{InMemoryMessageBus, InMemorySeatPriceLookup, MessageBus, SeatPriceLookup};
pub use settings::{DEFAULT_RESERVATION_TTL_SECS, ReservationSettings, RetryPolicy};
pub use worker::{DeadLetter, Delivery, MessageWorker};
