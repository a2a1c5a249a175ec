//! Seat price lookup trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use common::{EventId, Money, SeatId};

use crate::error::PricingError;

/// Trait for looking up the current list price of a seat.
#[async_trait]
pub trait SeatPriceLookup: Send + Sync {
    /// Returns the price of `seat_id` for `event_id`.
    async fn seat_price(&self, event_id: EventId, seat_id: SeatId) -> Result<Money, PricingError>;
}

#[derive(Debug, Default)]
struct InMemoryPricingState {
    prices: HashMap<(EventId, SeatId), Money>,
    default_price: Option<Money>,
    fail_on_lookup: bool,
}

/// In-memory price list.
#[derive(Debug, Clone, Default)]
pub struct InMemorySeatPriceLookup {
    state: Arc<RwLock<InMemoryPricingState>>,
}

impl InMemorySeatPriceLookup {
    /// Creates an empty price list. Unknown seats have no price.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a price list that falls back to `price` for unknown seats.
    pub fn with_default_price(price: Money) -> Self {
        let lookup = Self::default();
        lookup.write().default_price = Some(price);
        lookup
    }

    /// Sets the price of one seat.
    pub fn set_price(&self, event_id: EventId, seat_id: SeatId, price: Money) {
        self.write().prices.insert((event_id, seat_id), price);
    }

    /// Configures the lookup to fail as if the pricing service were down.
    pub fn set_fail_on_lookup(&self, fail: bool) {
        self.write().fail_on_lookup = fail;
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, InMemoryPricingState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl SeatPriceLookup for InMemorySeatPriceLookup {
    async fn seat_price(&self, event_id: EventId, seat_id: SeatId) -> Result<Money, PricingError> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);

        if state.fail_on_lookup {
            return Err(PricingError::Unavailable(
                "pricing service unreachable".to_string(),
            ));
        }

        state
            .prices
            .get(&(event_id, seat_id))
            .copied()
            .or(state.default_price)
            .ok_or(PricingError::NoPrice { event_id, seat_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_explicit_price_wins_over_default() {
        let lookup = InMemorySeatPriceLookup::with_default_price(Money::from_major(10));
        let event_id = EventId::new();
        let seat_id = SeatId::new();
        lookup.set_price(event_id, seat_id, Money::from_major(75));

        assert_eq!(
            lookup.seat_price(event_id, seat_id).await.unwrap(),
            Money::from_major(75)
        );
        assert_eq!(
            lookup.seat_price(event_id, SeatId::new()).await.unwrap(),
            Money::from_major(10)
        );
    }

    #[tokio::test]
    async fn test_unknown_seat_without_default() {
        let lookup = InMemorySeatPriceLookup::new();
        let result = lookup.seat_price(EventId::new(), SeatId::new()).await;
        assert!(matches!(result, Err(PricingError::NoPrice { .. })));
    }

    #[tokio::test]
    async fn test_fail_on_lookup() {
        let lookup = InMemorySeatPriceLookup::with_default_price(Money::from_major(10));
        lookup.set_fail_on_lookup(true);

        let result = lookup.seat_price(EventId::new(), SeatId::new()).await;
        assert!(matches!(result, Err(PricingError::Unavailable(_))));
    }
}
