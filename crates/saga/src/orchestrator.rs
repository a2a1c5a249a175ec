//! The CreateBooking use case.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use booking_store::{BookingRepository, BookingStore, SeatStatusStore, StoreTransaction};
use common::{Clock, EventId, SeatId, UserId};
use domain::{Booking, DomainError, SeatAvailability};

use crate::error::ReservationError;
use crate::messages::{BookingMessage, PaymentRequested};
use crate::services::{MessageBus, SeatPriceLookup};
use crate::settings::ReservationSettings;

/// Request to hold seats for a user.
#[derive(Debug, Clone)]
pub struct CreateBooking {
    pub user_id: UserId,
    pub event_id: EventId,
    pub seat_ids: Vec<SeatId>,
    pub client_ip: String,
}

impl CreateBooking {
    pub fn new(
        user_id: UserId,
        event_id: EventId,
        seat_ids: Vec<SeatId>,
        client_ip: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            event_id,
            seat_ids,
            client_ip: client_ip.into(),
        }
    }

    /// Requested seats with duplicates removed, first occurrence kept.
    fn distinct_seat_ids(&self) -> Vec<SeatId> {
        let mut seen = HashSet::with_capacity(self.seat_ids.len());
        self.seat_ids
            .iter()
            .copied()
            .filter(|id| seen.insert(*id))
            .collect()
    }
}

/// A committed booking and the payment request sent for it.
#[derive(Debug, Clone)]
pub struct BookingConfirmation {
    pub booking: Booking,
    pub payment_request: PaymentRequested,
}

/// Reserves seats and starts the payment saga.
///
/// Seats are locked, checked, priced and reserved inside one transaction.
/// The payment request is published only after that transaction commits.
pub struct ReservationOrchestrator<S, B, P>
where
    S: BookingStore,
    B: MessageBus,
    P: SeatPriceLookup,
{
    store: S,
    bus: B,
    pricing: P,
    clock: Arc<dyn Clock>,
    settings: ReservationSettings,
}

impl<S, B, P> ReservationOrchestrator<S, B, P>
where
    S: BookingStore,
    B: MessageBus,
    P: SeatPriceLookup,
{
    /// Creates a new orchestrator.
    pub fn new(
        store: S,
        bus: B,
        pricing: P,
        clock: Arc<dyn Clock>,
        settings: ReservationSettings,
    ) -> Self {
        Self {
            store,
            bus,
            pricing,
            clock,
            settings,
        }
    }

    pub fn settings(&self) -> &ReservationSettings {
        &self.settings
    }

    /// Reserves the requested seats and publishes a payment request.
    ///
    /// Nothing is written unless every seat exists, is available (or its
    /// hold has lapsed) and could be priced. If the publish fails after the
    /// commit, the booking stays PendingPayment and
    /// [`ReservationError::PaymentRequestNotPublished`] is returned.
    #[tracing::instrument(
        skip(self, cmd),
        fields(user_id = %cmd.user_id, event_id = %cmd.event_id, seats = cmd.seat_ids.len())
    )]
    pub async fn create_booking(
        &self,
        cmd: CreateBooking,
    ) -> Result<BookingConfirmation, ReservationError> {
        let seat_ids = cmd.distinct_seat_ids();
        if seat_ids.is_empty() {
            return Err(ReservationError::NoSeatsRequested);
        }

        let booking = self.reserve_with_retry(&cmd, &seat_ids).await?;
        let booking_id = booking.id();
        tracing::info!(%booking_id, total = %booking.total_price(), "seats reserved");

        let payment_request = PaymentRequested {
            booking_id,
            user_id: booking.user_id(),
            order_type: self.settings.order_type.clone(),
            amount: booking.total_price(),
            currency: self.settings.currency.clone(),
            order_info: format!("Payment for booking {booking_id}"),
            preferred_gateway: self.settings.preferred_gateway.clone(),
            ip_address: cmd.client_ip,
            timestamp: self.clock.now(),
        };

        if let Err(source) = self
            .bus
            .publish(BookingMessage::from(payment_request.clone()))
            .await
        {
            tracing::error!(
                %booking_id,
                error = %source,
                "booking committed but payment request was not published"
            );
            return Err(ReservationError::PaymentRequestNotPublished { booking_id, source });
        }

        Ok(BookingConfirmation {
            booking,
            payment_request,
        })
    }

    async fn reserve_with_retry(
        &self,
        cmd: &CreateBooking,
        seat_ids: &[SeatId],
    ) -> Result<Booking, ReservationError> {
        let max_attempts = self.settings.max_transaction_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.reserve(cmd, seat_ids).await {
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    tracing::warn!(attempt, error = %e, "reservation transaction retried");
                    tokio::time::sleep(self.settings.transaction_retry_backoff * attempt).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn reserve(
        &self,
        cmd: &CreateBooking,
        seat_ids: &[SeatId],
    ) -> Result<Booking, ReservationError> {
        let mut tx = self.store.begin().await?;

        match self.reserve_in(&mut tx, cmd, seat_ids).await {
            Ok(booking) => {
                tx.commit().await?;
                Ok(booking)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(error = %rollback_err, "rollback after failed reservation");
                }
                Err(e)
            }
        }
    }

    async fn reserve_in(
        &self,
        tx: &mut S::Transaction,
        cmd: &CreateBooking,
        seat_ids: &[SeatId],
    ) -> Result<Booking, ReservationError> {
        let event_id = cmd.event_id;

        let locked = tx.lock_seats_for_update(event_id, seat_ids).await?;
        // Read after the wait: holds that lapsed meanwhile count as expired.
        let now = self.clock.now();
        let mut seats: HashMap<SeatId, SeatAvailability> =
            locked.into_iter().map(|s| (s.seat_id(), s)).collect();

        let missing: Vec<SeatId> = seat_ids
            .iter()
            .copied()
            .filter(|id| !seats.contains_key(id))
            .collect();
        if !missing.is_empty() {
            return Err(ReservationError::SeatsNotFound {
                event_id,
                seat_ids: missing,
            });
        }

        let unavailable: Vec<SeatId> = seat_ids
            .iter()
            .copied()
            .filter(|id| seats.get(id).is_some_and(|s| !s.is_available_or_expired(now)))
            .collect();
        if !unavailable.is_empty() {
            tracing::info!(seat_ids = ?unavailable, "seats unavailable");
            return Err(ReservationError::SeatsUnavailable {
                event_id,
                seat_ids: unavailable,
            });
        }

        let mut booking = Booking::new(cmd.user_id, event_id, self.settings.reservation_ttl, now);
        let until = now + self.settings.reservation_ttl;

        for seat_id in seat_ids {
            let price = self
                .pricing
                .seat_price(event_id, *seat_id)
                .await
                .map_err(ReservationError::PricingUnavailable)?;

            let Some(seat) = seats.get_mut(seat_id) else {
                continue;
            };
            seat.snapshot_price(price, now).map_err(DomainError::from)?;
            booking
                .add_seat(*seat_id, price)
                .map_err(DomainError::from)?;
            seat.reserve(booking.id(), until, now)
                .map_err(DomainError::from)?;
        }

        tx.insert_booking(&booking).await?;
        for seat_id in seat_ids {
            if let Some(seat) = seats.get(seat_id) {
                tx.update_seat(seat).await?;
            }
        }

        Ok(booking)
    }
}
