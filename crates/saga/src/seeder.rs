//! Creates seat availability rows when an event is approved.

use booking_store::{BookingStore, SeatStatusStore, StoreTransaction};
use common::{Money, SeatId};
use domain::SeatAvailability;

use crate::error::Result;
use crate::messages::EventApproved;

/// Rows touched by one EventApproved delivery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub created: usize,
    pub existing: usize,
}

/// Consumes EventApproved. The only creator of seat availability rows.
#[derive(Clone)]
pub struct EventSeatSeeder<S: BookingStore> {
    store: S,
}

impl<S: BookingStore> EventSeatSeeder<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Inserts an Available row for every seat that has none yet.
    ///
    /// Rows are priced at zero here; the real price is snapshotted when a
    /// seat is reserved.
    #[tracing::instrument(skip(self, msg), fields(event_id = %msg.event_id, seats = msg.seat_ids.len()))]
    pub async fn on_event_approved(&self, msg: &EventApproved) -> Result<SeedReport> {
        let mut seat_ids: Vec<SeatId> = msg.seat_ids.clone();
        seat_ids.sort_unstable();
        seat_ids.dedup();

        let mut tx = self.store.begin().await?;
        let mut report = SeedReport::default();
        for seat_id in seat_ids {
            let seat = SeatAvailability::available(msg.event_id, seat_id, Money::zero());
            match tx.insert_seat_if_absent(&seat).await {
                Ok(true) => report.created += 1,
                Ok(false) => report.existing += 1,
                Err(e) => {
                    if let Err(rollback_err) = tx.rollback().await {
                        tracing::warn!(error = %rollback_err, "rollback after failed seeding");
                    }
                    return Err(e.into());
                }
            }
        }
        tx.commit().await?;

        tracing::info!(
            created = report.created,
            existing = report.existing,
            "event seats seeded"
        );
        Ok(report)
    }
}
