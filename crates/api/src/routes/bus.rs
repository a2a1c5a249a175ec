//! Message ingress standing in for the external broker.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use booking_store::BookingStore;
use saga::{BookingMessage, MessageBus};
use serde::Serialize;

use super::bookings::AppState;
use crate::error::ApiError;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageAccepted {
    pub message_type: &'static str,
}

/// POST /bus/messages: places a message on the bus for the worker.
#[tracing::instrument(skip(state, message), fields(message_type = message.message_type()))]
pub async fn publish<S: BookingStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(message): Json<BookingMessage>,
) -> Result<(StatusCode, Json<MessageAccepted>), ApiError> {
    let message_type = message.message_type();
    state.bus.publish(message).await?;
    Ok((StatusCode::ACCEPTED, Json(MessageAccepted { message_type })))
}
