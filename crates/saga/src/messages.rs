//! Messages exchanged over the bus.
//!
//! Field names are the compatibility surface with the other services and
//! are serialized in camelCase.

use chrono::{DateTime, Utc};
use common::{BookingId, EventId, Money, SeatId, UserId, VenueId};
use serde::{Deserialize, Serialize};

/// An event was approved and its seats can go on sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventApproved {
    pub event_id: EventId,
    pub venue_id: VenueId,
    pub seat_ids: Vec<SeatId>,
    pub timestamp: DateTime<Utc>,
}

/// Asks the Payment process to collect `amount` for a booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequested {
    pub booking_id: BookingId,
    pub user_id: UserId,
    pub order_type: String,
    /// Amount in minor units.
    pub amount: Money,
    pub currency: String,
    pub order_info: String,
    pub preferred_gateway: String,
    pub ip_address: String,
    pub timestamp: DateTime<Utc>,
}

/// The Payment process collected the money.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSucceeded {
    pub booking_id: BookingId,
    pub transaction_id: String,
    pub timestamp: DateTime<Utc>,
}

/// The Payment process gave up on the booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentFailed {
    pub booking_id: BookingId,
    pub transaction_id: String,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// Envelope for everything the booking service sends or receives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum BookingMessage {
    EventApproved(EventApproved),
    PaymentRequested(PaymentRequested),
    PaymentSucceeded(PaymentSucceeded),
    PaymentFailed(PaymentFailed),
}

impl BookingMessage {
    /// Returns the wire name of the message type.
    pub fn message_type(&self) -> &'static str {
        match self {
            BookingMessage::EventApproved(_) => "EventApproved",
            BookingMessage::PaymentRequested(_) => "PaymentRequested",
            BookingMessage::PaymentSucceeded(_) => "PaymentSucceeded",
            BookingMessage::PaymentFailed(_) => "PaymentFailed",
        }
    }

    /// Returns the booking the message refers to, if any.
    pub fn booking_id(&self) -> Option<BookingId> {
        match self {
            BookingMessage::EventApproved(_) => None,
            BookingMessage::PaymentRequested(m) => Some(m.booking_id),
            BookingMessage::PaymentSucceeded(m) => Some(m.booking_id),
            BookingMessage::PaymentFailed(m) => Some(m.booking_id),
        }
    }
}

impl From<EventApproved> for BookingMessage {
    fn from(message: EventApproved) -> Self {
        BookingMessage::EventApproved(message)
    }
}

impl From<PaymentRequested> for BookingMessage {
    fn from(message: PaymentRequested) -> Self {
        BookingMessage::PaymentRequested(message)
    }
}

impl From<PaymentSucceeded> for BookingMessage {
    fn from(message: PaymentSucceeded) -> Self {
        BookingMessage::PaymentSucceeded(message)
    }
}

impl From<PaymentFailed> for BookingMessage {
    fn from(message: PaymentFailed) -> Self {
        BookingMessage::PaymentFailed(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payment_succeeded_uses_wire_field_names() {
        let booking_id = BookingId::new();
        let message = BookingMessage::from(PaymentSucceeded {
            booking_id,
            transaction_id: "TX-1".into(),
            timestamp: Utc::now(),
        });

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["type"], "PaymentSucceeded");
        assert_eq!(value["data"]["bookingId"], booking_id.to_string());
        assert_eq!(value["data"]["transactionId"], "TX-1");
        assert_eq!(message.booking_id(), Some(booking_id));
    }

    #[test]
    fn event_approved_parses_from_broker_json() {
        let event_id = EventId::new();
        let seat = SeatId::new();
        let raw = json!({
            "type": "EventApproved",
            "data": {
                "eventId": event_id.to_string(),
                "venueId": VenueId::new().to_string(),
                "seatIds": [seat.to_string()],
                "timestamp": "2026-01-01T00:00:00Z"
            }
        });

        let message: BookingMessage = serde_json::from_value(raw).unwrap();
        let BookingMessage::EventApproved(approved) = &message else {
            panic!("expected EventApproved, got {}", message.message_type());
        };
        assert_eq!(approved.event_id, event_id);
        assert_eq!(approved.seat_ids, vec![seat]);
        assert_eq!(message.booking_id(), None);
    }

    #[test]
    fn payment_requested_amount_is_in_minor_units() {
        let message = PaymentRequested {
            booking_id: BookingId::new(),
            user_id: UserId::new(),
            order_type: "other".into(),
            amount: Money::from_major(125),
            currency: "VND".into(),
            order_info: "Booking".into(),
            preferred_gateway: "VnPay".into(),
            ip_address: "127.0.0.1".into(),
            timestamp: Utc::now(),
        };

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["amount"], 12_500);
        assert_eq!(value["preferredGateway"], "VnPay");
        assert_eq!(value["ipAddress"], "127.0.0.1");
    }
}
