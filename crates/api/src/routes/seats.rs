//! Seat availability listing.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use booking_store::BookingStore;
use chrono::{DateTime, Utc};
use common::{BookingId, EventId, SeatId};
use domain::SeatAvailability;
use serde::Serialize;

use super::bookings::AppState;
use super::parse_id;
use crate::error::ApiError;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatResponse {
    pub seat_id: SeatId,
    pub status: String,
    pub reserved_until: Option<DateTime<Utc>>,
    pub current_booking_id: Option<BookingId>,
    pub seat_price_cents: i64,
    /// Whether a reservation would succeed now, counting lapsed holds as free.
    pub available: bool,
}

impl SeatResponse {
    fn at(seat: &SeatAvailability, now: DateTime<Utc>) -> Self {
        Self {
            seat_id: seat.seat_id(),
            status: seat.status().to_string(),
            reserved_until: seat.reserved_until(),
            current_booking_id: seat.current_booking_id(),
            seat_price_cents: seat.seat_price().cents(),
            available: seat.is_available_or_expired(now),
        }
    }
}

/// GET /events/{id}/seats
pub async fn list<S: BookingStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<SeatResponse>>, ApiError> {
    let event_id: EventId = parse_id(&id, "event id")?;
    let now = state.clock.now();
    let seats = state.store.seats_for_event(event_id).await?;
    Ok(Json(
        seats.iter().map(|seat| SeatResponse::at(seat, now)).collect(),
    ))
}
