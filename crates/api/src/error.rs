//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use booking_store::StoreError;
use saga::{BusError, ReservationError};
use serde_json::{Value, json};

const OPAQUE_MESSAGE: &str = "internal server error";

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Booking creation failed.
    Reservation(ReservationError),
    /// Storage failure outside the reservation path.
    Store(StoreError),
    /// The message could not be placed on the bus.
    Bus(BusError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            ApiError::Reservation(err) => reservation_error_to_response(err),
            ApiError::Store(err) => store_error_to_response(err),
            ApiError::Bus(err) => {
                tracing::error!(error = %err, "message bus publish failed");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    json!({ "error": "message bus unavailable" }),
                )
            }
        };

        (status, axum::Json(body)).into_response()
    }
}

fn internal() -> (StatusCode, Value) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        json!({ "error": OPAQUE_MESSAGE }),
    )
}

fn reservation_error_to_response(err: ReservationError) -> (StatusCode, Value) {
    match &err {
        ReservationError::NoSeatsRequested => {
            (StatusCode::BAD_REQUEST, json!({ "error": err.to_string() }))
        }
        ReservationError::SeatsNotFound { seat_ids, .. } => (
            StatusCode::NOT_FOUND,
            json!({ "error": "seats not found", "missingSeatIds": seat_ids }),
        ),
        ReservationError::SeatsUnavailable { seat_ids, .. } => (
            StatusCode::CONFLICT,
            json!({ "error": "seats unavailable", "unavailableSeatIds": seat_ids }),
        ),
        ReservationError::PricingUnavailable(source) => {
            tracing::warn!(error = %source, "seat pricing unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                json!({ "error": "pricing service unavailable" }),
            )
        }
        ReservationError::Store(store_err) if store_err.is_transient() => {
            tracing::warn!(error = %store_err, "reservation gave up on transient failures");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                json!({ "error": "service busy, retry later" }),
            )
        }
        _ => {
            tracing::error!(error = %err, "reservation failed");
            internal()
        }
    }
}

fn store_error_to_response(err: StoreError) -> (StatusCode, Value) {
    if err.is_transient() {
        tracing::warn!(error = %err, "transient storage failure");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            json!({ "error": "service busy, retry later" }),
        );
    }
    tracing::error!(error = %err, "storage failure");
    internal()
}

impl From<ReservationError> for ApiError {
    fn from(err: ReservationError) -> Self {
        ApiError::Reservation(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Store(err)
    }
}

impl From<BusError> for ApiError {
    fn from(err: BusError) -> Self {
        ApiError::Bus(err)
    }
}
