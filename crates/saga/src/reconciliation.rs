//! Detection of bookings whose payment saga never finished.

use std::sync::Arc;
use std::time::Duration;

use booking_store::BookingStore;
use chrono::{DateTime, Utc};
use common::{BookingId, Clock, EventId, UserId};

use crate::error::Result;

/// A PendingPayment booking well past its hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DanglingBooking {
    pub booking_id: BookingId,
    pub user_id: UserId,
    pub event_id: EventId,
    pub expired_at: DateTime<Utc>,
    pub overdue: chrono::Duration,
}

/// Reports bookings stuck in PendingPayment after `expires_at + grace`.
///
/// Usually the payment request was never published or the outcome message
/// was lost. The detector only reports; it never fails or releases a booking,
/// so a late PaymentSucceeded can still confirm it.
pub struct DanglingBookingDetector<S: BookingStore> {
    store: S,
    clock: Arc<dyn Clock>,
    grace: chrono::Duration,
}

impl<S: BookingStore> DanglingBookingDetector<S> {
    pub fn new(store: S, clock: Arc<dyn Clock>, grace: chrono::Duration) -> Self {
        Self {
            store,
            clock,
            grace,
        }
    }

    /// Lists dangling bookings, oldest first, logging each one.
    pub async fn scan(&self) -> Result<Vec<DanglingBooking>> {
        let now = self.clock.now();
        let cutoff = now - self.grace;

        let dangling: Vec<DanglingBooking> = self
            .store
            .pending_bookings_expired_before(cutoff)
            .await?
            .into_iter()
            .filter_map(|booking| {
                let expired_at = booking.expires_at()?;
                Some(DanglingBooking {
                    booking_id: booking.id(),
                    user_id: booking.user_id(),
                    event_id: booking.event_id(),
                    expired_at,
                    overdue: now - expired_at,
                })
            })
            .collect();

        for booking in &dangling {
            tracing::warn!(
                booking_id = %booking.booking_id,
                event_id = %booking.event_id,
                expired_at = %booking.expired_at,
                overdue_secs = booking.overdue.num_seconds(),
                "booking still pending payment past its hold"
            );
        }
        Ok(dangling)
    }

    /// Scans every `period` forever. Scan errors are logged and skipped.
    pub async fn run(self, period: Duration) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.scan().await {
                tracing::error!(error = %e, "dangling booking scan failed");
            }
        }
    }
}
