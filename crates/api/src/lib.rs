//! HTTP API server for the seat booking service.
//!
//! Exposes booking creation and queries, seat availability, and a bus
//! ingress that feeds payment outcomes and event approvals to the saga
//! worker, with structured logging (tracing).

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use booking_store::BookingStore;
use common::{Clock, SystemClock};
use saga::{
    BookingMessage, InMemoryMessageBus, InMemorySeatPriceLookup, ReservationOrchestrator,
    ReservationSettings,
};
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::bookings::AppState;

/// Capacity of the in-process bus channel feeding the worker.
pub const BUS_CHANNEL_CAPACITY: usize = 1024;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: BookingStore + Clone + 'static>(state: Arc<AppState<S>>) -> Router {
    Router::new()
        .route("/health", get(routes::health::check::<S>))
        .route("/bookings", post(routes::bookings::create::<S>))
        .route("/bookings/{id}", get(routes::bookings::get::<S>))
        .route(
            "/users/{id}/bookings",
            get(routes::bookings::list_for_user::<S>),
        )
        .route("/events/{id}/seats", get(routes::seats::list::<S>))
        .route("/bus/messages", post(routes::bus::publish::<S>))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the application state on the system clock.
///
/// Returns the receiving end of the bus for the message worker.
pub fn create_default_state<S: BookingStore + Clone + 'static>(
    store: S,
    settings: ReservationSettings,
    pricing: InMemorySeatPriceLookup,
) -> (Arc<AppState<S>>, mpsc::Receiver<BookingMessage>) {
    create_state_with_clock(store, settings, pricing, Arc::new(SystemClock))
}

/// Creates the application state on an explicit clock.
pub fn create_state_with_clock<S: BookingStore + Clone + 'static>(
    store: S,
    settings: ReservationSettings,
    pricing: InMemorySeatPriceLookup,
    clock: Arc<dyn Clock>,
) -> (Arc<AppState<S>>, mpsc::Receiver<BookingMessage>) {
    let (bus, receiver) = InMemoryMessageBus::with_channel(BUS_CHANNEL_CAPACITY);
    let orchestrator = ReservationOrchestrator::new(
        store.clone(),
        bus.clone(),
        pricing,
        clock.clone(),
        settings,
    );

    let state = Arc::new(AppState {
        orchestrator,
        store,
        bus,
        clock,
    });

    (state, receiver)
}
