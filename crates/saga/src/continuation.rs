//! Payment outcome handlers that finish the booking saga.

use booking_store::{BookingRepository, BookingStore, SeatStatusStore, StoreTransaction};
use domain::{BookingStatus, DomainError, ReleaseOutcome};

use crate::error::Result;
use crate::messages::{PaymentFailed, PaymentSucceeded};

/// What a handler did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// The booking moved to its terminal status.
    Applied,

    /// The booking was already in the target status (redelivery).
    Duplicate,

    /// No booking with the message's id exists.
    BookingNotFound,

    /// The booking is in a status the message cannot apply to.
    Anomalous,
}

/// Consumes PaymentSucceeded / PaymentFailed.
///
/// Each message is applied in its own transaction that locks the booking
/// first and then its seats. Redelivered and out-of-place messages return
/// without error.
#[derive(Clone)]
pub struct PaymentOutcomeHandler<S: BookingStore> {
    store: S,
}

impl<S: BookingStore> PaymentOutcomeHandler<S> {
    /// Creates a new handler.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Confirms the booking and sells the seats it still holds.
    ///
    /// Seats whose hold lapsed and went to another booking are left alone;
    /// the booking is confirmed regardless because the customer has paid.
    #[tracing::instrument(skip(self, msg), fields(booking_id = %msg.booking_id, transaction_id = %msg.transaction_id))]
    pub async fn on_payment_succeeded(&self, msg: &PaymentSucceeded) -> Result<HandlerOutcome> {
        let mut tx = self.store.begin().await?;
        let result = confirm(&mut tx, msg).await;
        settle(tx, result).await
    }

    /// Fails the booking and releases the seats still bound to it.
    #[tracing::instrument(skip(self, msg), fields(booking_id = %msg.booking_id, transaction_id = %msg.transaction_id))]
    pub async fn on_payment_failed(&self, msg: &PaymentFailed) -> Result<HandlerOutcome> {
        let mut tx = self.store.begin().await?;
        let result = fail(&mut tx, msg).await;
        settle(tx, result).await
    }
}

async fn confirm<T: StoreTransaction>(tx: &mut T, msg: &PaymentSucceeded) -> Result<HandlerOutcome> {
    let Some(mut booking) = tx.lock_booking(msg.booking_id).await? else {
        tracing::warn!("payment succeeded for unknown booking");
        return Ok(HandlerOutcome::BookingNotFound);
    };

    match booking.status() {
        BookingStatus::PendingPayment => {}
        BookingStatus::Confirmed => {
            tracing::debug!("booking already confirmed");
            return Ok(HandlerOutcome::Duplicate);
        }
        status => {
            tracing::warn!(%status, "payment succeeded for a booking that is no longer pending");
            return Ok(HandlerOutcome::Anomalous);
        }
    }

    booking.confirm_payment().map_err(DomainError::from)?;
    tx.update_booking(&booking).await?;

    let booking_id = booking.id();
    let seat_ids = booking.seat_ids();
    let mut seats = tx
        .lock_seats_for_update(booking.event_id(), &seat_ids)
        .await?;
    if seats.len() < seat_ids.len() {
        tracing::error!(
            expected = seat_ids.len(),
            found = seats.len(),
            "booked seats missing from availability"
        );
    }

    for seat in &mut seats {
        if seat.is_reserved_by(booking_id) {
            seat.sell(booking_id).map_err(DomainError::from)?;
            tx.update_seat(seat).await?;
        } else {
            tracing::warn!(
                seat_id = %seat.seat_id(),
                status = %seat.status(),
                holder = ?seat.current_booking_id(),
                "seat hold lapsed before payment cleared; booking confirmed without it"
            );
        }
    }

    tracing::info!("booking confirmed");
    Ok(HandlerOutcome::Applied)
}

async fn fail<T: StoreTransaction>(tx: &mut T, msg: &PaymentFailed) -> Result<HandlerOutcome> {
    let Some(mut booking) = tx.lock_booking(msg.booking_id).await? else {
        tracing::warn!("payment failed for unknown booking");
        return Ok(HandlerOutcome::BookingNotFound);
    };

    match booking.status() {
        BookingStatus::PendingPayment => {}
        BookingStatus::Failed => {
            tracing::debug!("booking already failed");
            return Ok(HandlerOutcome::Duplicate);
        }
        status => {
            tracing::warn!(%status, "payment failed for a booking that is no longer pending");
            return Ok(HandlerOutcome::Anomalous);
        }
    }

    booking.fail_payment();
    tx.update_booking(&booking).await?;

    let booking_id = booking.id();
    let mut seats = tx
        .lock_seats_for_update(booking.event_id(), &booking.seat_ids())
        .await?;

    for seat in &mut seats {
        // Seats already handed to someone else are not ours to release.
        if seat.current_booking_id() != Some(booking_id) {
            continue;
        }
        match seat
            .make_available(Some(booking_id))
            .map_err(DomainError::from)?
        {
            ReleaseOutcome::Released => tx.update_seat(seat).await?,
            ReleaseOutcome::Skipped => {}
        }
    }

    tracing::info!(reason = %msg.reason, "booking failed, seats released");
    Ok(HandlerOutcome::Applied)
}

/// Commits applied changes and rolls back everything else.
async fn settle<T: StoreTransaction>(
    tx: T,
    result: Result<HandlerOutcome>,
) -> Result<HandlerOutcome> {
    match result {
        Ok(HandlerOutcome::Applied) => {
            tx.commit().await?;
            Ok(HandlerOutcome::Applied)
        }
        Ok(outcome) => {
            tx.rollback().await?;
            Ok(outcome)
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(error = %rollback_err, "rollback after failed handler");
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use booking_store::InMemoryBookingStore;
    use chrono::{Duration, Utc};
    use common::{BookingId, EventId, Money, SeatId, UserId};
    use domain::{Booking, SeatAvailability, SeatStatus};

    async fn pending_booking(store: &InMemoryBookingStore, seat_count: usize) -> Booking {
        let event_id = EventId::new();
        let now = Utc::now();
        let mut booking = Booking::new(UserId::new(), event_id, Duration::minutes(10), now);
        let until = booking.expires_at().unwrap();

        let mut tx = store.begin().await.unwrap();
        for _ in 0..seat_count {
            let mut seat =
                SeatAvailability::available(event_id, SeatId::new(), Money::from_major(20));
            booking.add_seat(seat.seat_id(), seat.seat_price()).unwrap();
            seat.reserve(booking.id(), until, now).unwrap();
            tx.insert_seat_if_absent(&seat).await.unwrap();
        }
        tx.insert_booking(&booking).await.unwrap();
        tx.commit().await.unwrap();
        booking
    }

    fn succeeded(booking_id: BookingId) -> PaymentSucceeded {
        PaymentSucceeded {
            booking_id,
            transaction_id: "TX-1".to_string(),
            timestamp: Utc::now(),
        }
    }

    fn failed(booking_id: BookingId) -> PaymentFailed {
        PaymentFailed {
            booking_id,
            transaction_id: "TX-1".to_string(),
            reason: "card declined".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_unknown_booking_is_reported_not_raised() {
        let handler = PaymentOutcomeHandler::new(InMemoryBookingStore::new());

        assert_eq!(
            handler
                .on_payment_succeeded(&succeeded(BookingId::new()))
                .await
                .unwrap(),
            HandlerOutcome::BookingNotFound
        );
        assert_eq!(
            handler
                .on_payment_failed(&failed(BookingId::new()))
                .await
                .unwrap(),
            HandlerOutcome::BookingNotFound
        );
    }

    #[tokio::test]
    async fn test_success_after_failure_is_anomalous() {
        let store = InMemoryBookingStore::new();
        let booking = pending_booking(&store, 1).await;
        let handler = PaymentOutcomeHandler::new(store.clone());

        handler.on_payment_failed(&failed(booking.id())).await.unwrap();
        let outcome = handler
            .on_payment_succeeded(&succeeded(booking.id()))
            .await
            .unwrap();

        assert_eq!(outcome, HandlerOutcome::Anomalous);
        let stored = store.get_booking(booking.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), BookingStatus::Failed);
        let seat = store
            .get_seat(booking.event_id(), booking.seat_ids()[0])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(seat.status(), SeatStatus::Available);
    }

    #[tokio::test]
    async fn test_failure_after_confirmation_keeps_seats_sold() {
        let store = InMemoryBookingStore::new();
        let booking = pending_booking(&store, 2).await;
        let handler = PaymentOutcomeHandler::new(store.clone());

        handler
            .on_payment_succeeded(&succeeded(booking.id()))
            .await
            .unwrap();
        let outcome = handler.on_payment_failed(&failed(booking.id())).await.unwrap();

        assert_eq!(outcome, HandlerOutcome::Anomalous);
        for seat in store.seats_for_event(booking.event_id()).await.unwrap() {
            assert_eq!(seat.status(), SeatStatus::Sold);
        }
    }

    #[tokio::test]
    async fn test_duplicate_failure_is_noop() {
        let store = InMemoryBookingStore::new();
        let booking = pending_booking(&store, 1).await;
        let handler = PaymentOutcomeHandler::new(store.clone());

        assert_eq!(
            handler.on_payment_failed(&failed(booking.id())).await.unwrap(),
            HandlerOutcome::Applied
        );
        assert_eq!(
            handler.on_payment_failed(&failed(booking.id())).await.unwrap(),
            HandlerOutcome::Duplicate
        );
    }
}
