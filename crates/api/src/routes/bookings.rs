//! Booking endpoints.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::extract::{ConnectInfo, FromRequestParts, Path, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use booking_store::BookingStore;
use chrono::{DateTime, Utc};
use common::{BookingId, Clock, EventId, SeatId, UserId};
use domain::Booking;
use saga::{CreateBooking, InMemoryMessageBus, InMemorySeatPriceLookup, ReservationOrchestrator};
use serde::{Deserialize, Serialize};

use super::parse_id;
use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<S: BookingStore> {
    pub orchestrator: ReservationOrchestrator<S, InMemoryMessageBus, InMemorySeatPriceLookup>,
    pub store: S,
    pub bus: InMemoryMessageBus,
    pub clock: Arc<dyn Clock>,
}

/// Address of the caller, forwarded to the payment gateway.
///
/// Taken from the first `X-Forwarded-For` hop, then from the socket peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub String);

impl<S: Send + Sync> FromRequestParts<S> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|hop| !hop.is_empty());
        if let Some(hop) = forwarded {
            return Ok(ClientIp(hop.to_string()));
        }

        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());
        Ok(ClientIp(peer.unwrap_or_else(|| "unknown".to_string())))
    }
}

// -- Request types --

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookingRequest {
    pub user_id: String,
    pub event_id: String,
    pub seat_ids: Vec<String>,
}

// -- Response types --

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingResponse {
    pub id: BookingId,
    pub user_id: UserId,
    pub event_id: EventId,
    pub status: String,
    pub total_price_cents: i64,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub seats: Vec<BookedSeatResponse>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookedSeatResponse {
    pub seat_id: SeatId,
    pub price_at_booking_cents: i64,
}

impl From<&Booking> for BookingResponse {
    fn from(booking: &Booking) -> Self {
        Self {
            id: booking.id(),
            user_id: booking.user_id(),
            event_id: booking.event_id(),
            status: booking.status().to_string(),
            total_price_cents: booking.total_price().cents(),
            expires_at: booking.expires_at(),
            created_at: booking.created_at(),
            seats: booking
                .seats()
                .iter()
                .map(|seat| BookedSeatResponse {
                    seat_id: seat.seat_id(),
                    price_at_booking_cents: seat.price_at_booking().cents(),
                })
                .collect(),
        }
    }
}

// -- Handlers --

/// POST /bookings: holds seats and requests payment.
#[tracing::instrument(skip(state, body))]
pub async fn create<S: BookingStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    client_ip: ClientIp,
    Json(body): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<BookingResponse>), ApiError> {
    let user_id: UserId = parse_id(&body.user_id, "user id")?;
    let event_id: EventId = parse_id(&body.event_id, "event id")?;
    let seat_ids = body
        .seat_ids
        .iter()
        .map(|raw| parse_id::<SeatId>(raw, "seat id"))
        .collect::<Result<Vec<_>, _>>()?;

    let confirmation = state
        .orchestrator
        .create_booking(CreateBooking::new(user_id, event_id, seat_ids, client_ip.0))
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(BookingResponse::from(&confirmation.booking)),
    ))
}

/// GET /bookings/{id}
pub async fn get<S: BookingStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<BookingResponse>, ApiError> {
    let booking_id: BookingId = parse_id(&id, "booking id")?;
    let booking = state
        .store
        .get_booking(booking_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("booking {booking_id} not found")))?;
    Ok(Json(BookingResponse::from(&booking)))
}

/// GET /users/{id}/bookings: newest first.
pub async fn list_for_user<S: BookingStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<BookingResponse>>, ApiError> {
    let user_id: UserId = parse_id(&id, "user id")?;
    let bookings = state.store.bookings_for_user(user_id).await?;
    Ok(Json(bookings.iter().map(BookingResponse::from).collect()))
}
