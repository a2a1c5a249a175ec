use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{BookingId, EventId, SeatId, UserId};
use domain::{Booking, BookingStatus, SeatAvailability};
use tokio::sync::{OwnedMutexGuard, RwLock};

use crate::{
    Result, StoreError,
    store::{BookingRepository, BookingStore, SeatStatusStore, StoreTransaction, lock_order},
};

type SeatKey = (EventId, SeatId);
type RowLock = Arc<tokio::sync::Mutex<()>>;

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct Committed {
    seats: HashMap<SeatKey, SeatAvailability>,
    bookings: HashMap<BookingId, Booking>,
}

/// One async mutex per row, created on first use and evicted once nobody
/// holds or waits for it.
struct LockTable<K> {
    rows: Mutex<HashMap<K, RowLock>>,
}

impl<K: Hash + Eq + Copy> LockTable<K> {
    fn new() -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
        }
    }

    fn handle(&self, key: K) -> RowLock {
        let mut rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(rows.entry(key).or_default())
    }

    /// Drops the entry for `key` if the table holds the only reference.
    ///
    /// Handles are only cloned under the table mutex, so a count of one
    /// cannot race with a new waiter.
    fn release(&self, key: &K) {
        let mut rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        if rows.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            rows.remove(key);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Waits up to `timeout` for the row lock on `key`.
    async fn lock(
        self: &Arc<Self>,
        key: K,
        timeout: Duration,
        what: impl FnOnce() -> String,
    ) -> Result<RowGuard<K>> {
        let lock = self.handle(key);
        match tokio::time::timeout(timeout, lock.lock_owned()).await {
            Ok(guard) => Ok(RowGuard {
                table: Arc::clone(self),
                key,
                guard: Some(guard),
            }),
            Err(_) => {
                self.release(&key);
                Err(StoreError::Transient(format!("lock timeout on {}", what())))
            }
        }
    }
}

/// A held row lock. Dropping it unlocks the row and evicts idle entries.
struct RowGuard<K: Hash + Eq + Copy> {
    table: Arc<LockTable<K>>,
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K: Hash + Eq + Copy> Drop for RowGuard<K> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.table.release(&self.key);
    }
}

/// In-memory booking store.
///
/// Provides the same locking contract as the PostgreSQL implementation:
/// every seat and booking row has its own async mutex, held by the owning
/// transaction until commit or rollback. Writes are buffered in the
/// transaction and become visible atomically on commit, before the row locks
/// are released.
#[derive(Clone)]
pub struct InMemoryBookingStore {
    committed: Arc<RwLock<Committed>>,
    seat_locks: Arc<LockTable<SeatKey>>,
    booking_locks: Arc<LockTable<BookingId>>,
    lock_timeout: Duration,
}

impl InMemoryBookingStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            committed: Arc::new(RwLock::new(Committed::default())),
            seat_locks: Arc::new(LockTable::new()),
            booking_locks: Arc::new(LockTable::new()),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Sets how long a transaction waits for a row lock before failing with
    /// [`StoreError::Transient`].
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// Returns the number of committed seat rows.
    pub async fn seat_count(&self) -> usize {
        self.committed.read().await.seats.len()
    }

    /// Returns the number of committed bookings.
    pub async fn booking_count(&self) -> usize {
        self.committed.read().await.bookings.len()
    }
}

impl Default for InMemoryBookingStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Transaction over an [`InMemoryBookingStore`].
pub struct InMemoryTransaction {
    store: InMemoryBookingStore,
    seat_guards: HashMap<SeatKey, RowGuard<SeatKey>>,
    booking_guards: HashMap<BookingId, RowGuard<BookingId>>,
    seat_writes: HashMap<SeatKey, SeatAvailability>,
    booking_writes: HashMap<BookingId, Booking>,
    inserted_bookings: HashSet<BookingId>,
}

impl InMemoryTransaction {
    fn new(store: InMemoryBookingStore) -> Self {
        Self {
            store,
            seat_guards: HashMap::new(),
            booking_guards: HashMap::new(),
            seat_writes: HashMap::new(),
            booking_writes: HashMap::new(),
            inserted_bookings: HashSet::new(),
        }
    }

    async fn acquire_seat(&mut self, key: SeatKey) -> Result<()> {
        if self.seat_guards.contains_key(&key) {
            return Ok(());
        }
        let guard = self
            .store
            .seat_locks
            .lock(key, self.store.lock_timeout, || {
                format!("seat {} of event {}", key.1, key.0)
            })
            .await?;
        self.seat_guards.insert(key, guard);
        Ok(())
    }

    async fn acquire_booking(&mut self, booking_id: BookingId) -> Result<()> {
        if self.booking_guards.contains_key(&booking_id) {
            return Ok(());
        }
        let guard = self
            .store
            .booking_locks
            .lock(booking_id, self.store.lock_timeout, || {
                format!("booking {booking_id}")
            })
            .await?;
        self.booking_guards.insert(booking_id, guard);
        Ok(())
    }
}

#[async_trait]
impl SeatStatusStore for InMemoryTransaction {
    async fn lock_seats_for_update(
        &mut self,
        event_id: EventId,
        seat_ids: &[SeatId],
    ) -> Result<Vec<SeatAvailability>> {
        let ordered = lock_order(seat_ids);
        for seat_id in &ordered {
            self.acquire_seat((event_id, *seat_id)).await?;
        }

        let committed = self.store.committed.read().await;
        let mut found = Vec::with_capacity(ordered.len());
        let mut missing = Vec::new();
        for seat_id in ordered {
            let key = (event_id, seat_id);
            match self
                .seat_writes
                .get(&key)
                .or_else(|| committed.seats.get(&key))
            {
                Some(seat) => found.push(seat.clone()),
                None => missing.push(key),
            }
        }
        drop(committed);

        // No row, nothing to lock.
        for key in missing {
            self.seat_guards.remove(&key);
        }
        Ok(found)
    }

    async fn update_seat(&mut self, seat: &SeatAvailability) -> Result<()> {
        let key = (seat.event_id(), seat.seat_id());
        if !self.seat_guards.contains_key(&key) {
            return Err(StoreError::SeatNotLocked {
                event_id: key.0,
                seat_id: key.1,
            });
        }
        self.seat_writes.insert(key, seat.clone());
        Ok(())
    }

    async fn insert_seat_if_absent(&mut self, seat: &SeatAvailability) -> Result<bool> {
        let key = (seat.event_id(), seat.seat_id());
        self.acquire_seat(key).await?;

        let exists = self.seat_writes.contains_key(&key)
            || self.store.committed.read().await.seats.contains_key(&key);
        if exists {
            return Ok(false);
        }
        self.seat_writes.insert(key, seat.clone());
        Ok(true)
    }
}

#[async_trait]
impl BookingRepository for InMemoryTransaction {
    async fn lock_booking(&mut self, booking_id: BookingId) -> Result<Option<Booking>> {
        self.acquire_booking(booking_id).await?;

        if let Some(booking) = self.booking_writes.get(&booking_id) {
            return Ok(Some(booking.clone()));
        }
        Ok(self
            .store
            .committed
            .read()
            .await
            .bookings
            .get(&booking_id)
            .cloned())
    }

    async fn insert_booking(&mut self, booking: &Booking) -> Result<()> {
        let booking_id = booking.id();
        let exists = self.booking_writes.contains_key(&booking_id)
            || self
                .store
                .committed
                .read()
                .await
                .bookings
                .contains_key(&booking_id);
        if exists {
            return Err(StoreError::DuplicateBooking(booking_id));
        }

        self.inserted_bookings.insert(booking_id);
        self.booking_writes.insert(booking_id, booking.clone());
        Ok(())
    }

    async fn update_booking(&mut self, booking: &Booking) -> Result<()> {
        let booking_id = booking.id();
        if !self.booking_guards.contains_key(&booking_id)
            && !self.inserted_bookings.contains(&booking_id)
        {
            return Err(StoreError::BookingNotLocked(booking_id));
        }
        self.booking_writes.insert(booking_id, booking.clone());
        Ok(())
    }
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn commit(mut self) -> Result<()> {
        let committed = Arc::clone(&self.store.committed);
        let mut state = committed.write().await;

        let seats_written = self.seat_writes.len();
        let bookings_written = self.booking_writes.len();
        state.seats.extend(self.seat_writes.drain());
        state.bookings.extend(self.booking_writes.drain());
        drop(state);

        tracing::trace!(seats_written, bookings_written, "in-memory transaction committed");
        // Row locks are released when `self` drops, after the writes are visible.
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl BookingStore for InMemoryBookingStore {
    type Transaction = InMemoryTransaction;

    async fn begin(&self) -> Result<Self::Transaction> {
        Ok(InMemoryTransaction::new(self.clone()))
    }

    async fn get_booking(&self, booking_id: BookingId) -> Result<Option<Booking>> {
        Ok(self.committed.read().await.bookings.get(&booking_id).cloned())
    }

    async fn bookings_for_user(&self, user_id: UserId) -> Result<Vec<Booking>> {
        let state = self.committed.read().await;
        let mut bookings: Vec<_> = state
            .bookings
            .values()
            .filter(|b| b.user_id() == user_id)
            .cloned()
            .collect();
        bookings.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        Ok(bookings)
    }

    async fn get_seat(
        &self,
        event_id: EventId,
        seat_id: SeatId,
    ) -> Result<Option<SeatAvailability>> {
        Ok(self
            .committed
            .read()
            .await
            .seats
            .get(&(event_id, seat_id))
            .cloned())
    }

    async fn seats_for_event(&self, event_id: EventId) -> Result<Vec<SeatAvailability>> {
        let state = self.committed.read().await;
        let mut seats: Vec<_> = state
            .seats
            .values()
            .filter(|s| s.event_id() == event_id)
            .cloned()
            .collect();
        seats.sort_by_key(|s| s.seat_id());
        Ok(seats)
    }

    async fn pending_bookings_expired_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Booking>> {
        let state = self.committed.read().await;
        let mut bookings: Vec<_> = state
            .bookings
            .values()
            .filter(|b| {
                b.status() == BookingStatus::PendingPayment
                    && b.expires_at().is_some_and(|at| at < cutoff)
            })
            .cloned()
            .collect();
        bookings.sort_by_key(|b| b.expires_at());
        Ok(bookings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use common::Money;

    async fn seed(store: &InMemoryBookingStore, event_id: EventId, count: usize) -> Vec<SeatId> {
        let mut tx = store.begin().await.unwrap();
        let mut ids = Vec::new();
        for _ in 0..count {
            let seat_id = SeatId::new();
            let seat = SeatAvailability::available(event_id, seat_id, Money::from_major(50));
            assert!(tx.insert_seat_if_absent(&seat).await.unwrap());
            ids.push(seat_id);
        }
        tx.commit().await.unwrap();
        ids
    }

    fn pending_booking(event_id: EventId) -> Booking {
        Booking::new(
            UserId::new(),
            event_id,
            ChronoDuration::minutes(10),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn lock_returns_existing_rows_sorted_and_deduplicated() {
        let store = InMemoryBookingStore::new();
        let event_id = EventId::new();
        let ids = seed(&store, event_id, 2).await;
        let missing = SeatId::new();

        let mut tx = store.begin().await.unwrap();
        let locked = tx
            .lock_seats_for_update(event_id, &[ids[1], missing, ids[0], ids[1]])
            .await
            .unwrap();

        let mut expected = ids.clone();
        expected.sort();
        let locked_ids: Vec<_> = locked.iter().map(|s| s.seat_id()).collect();
        assert_eq!(locked_ids, expected);
    }

    #[tokio::test]
    async fn seats_of_other_events_are_not_returned() {
        let store = InMemoryBookingStore::new();
        let event_id = EventId::new();
        let ids = seed(&store, event_id, 1).await;

        let mut tx = store.begin().await.unwrap();
        let locked = tx.lock_seats_for_update(EventId::new(), &ids).await.unwrap();
        assert!(locked.is_empty());
    }

    #[tokio::test]
    async fn update_requires_lock() {
        let store = InMemoryBookingStore::new();
        let event_id = EventId::new();
        let ids = seed(&store, event_id, 1).await;
        let seat = store.get_seat(event_id, ids[0]).await.unwrap().unwrap();

        let mut tx = store.begin().await.unwrap();
        let result = tx.update_seat(&seat).await;
        assert!(matches!(result, Err(StoreError::SeatNotLocked { .. })));
    }

    #[tokio::test]
    async fn writes_are_invisible_until_commit() {
        let store = InMemoryBookingStore::new();
        let event_id = EventId::new();
        let ids = seed(&store, event_id, 1).await;
        let booking = pending_booking(event_id);

        let mut tx = store.begin().await.unwrap();
        let mut seat = tx.lock_seats_for_update(event_id, &ids).await.unwrap().remove(0);
        seat.reserve(booking.id(), booking.expires_at().unwrap(), Utc::now())
            .unwrap();
        tx.update_seat(&seat).await.unwrap();
        tx.insert_booking(&booking).await.unwrap();

        let before = store.get_seat(event_id, ids[0]).await.unwrap().unwrap();
        assert!(before.current_booking_id().is_none());
        assert!(store.get_booking(booking.id()).await.unwrap().is_none());

        tx.commit().await.unwrap();

        let after = store.get_seat(event_id, ids[0]).await.unwrap().unwrap();
        assert!(after.is_reserved_by(booking.id()));
        assert_eq!(store.get_booking(booking.id()).await.unwrap(), Some(booking));
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back_and_releases_locks() {
        let store = InMemoryBookingStore::new();
        let event_id = EventId::new();
        let ids = seed(&store, event_id, 1).await;

        {
            let mut tx = store.begin().await.unwrap();
            let mut seat = tx.lock_seats_for_update(event_id, &ids).await.unwrap().remove(0);
            seat.reserve(
                BookingId::new(),
                Utc::now() + ChronoDuration::minutes(10),
                Utc::now(),
            )
            .unwrap();
            tx.update_seat(&seat).await.unwrap();
        }

        let store = store.with_lock_timeout(Duration::from_millis(50));
        let mut tx = store.begin().await.unwrap();
        let seats = tx.lock_seats_for_update(event_id, &ids).await.unwrap();
        assert!(seats[0].current_booking_id().is_none());
        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn overlapping_lock_times_out_while_held() {
        let store = InMemoryBookingStore::new().with_lock_timeout(Duration::from_millis(50));
        let event_id = EventId::new();
        let ids = seed(&store, event_id, 1).await;

        let mut holder = store.begin().await.unwrap();
        holder.lock_seats_for_update(event_id, &ids).await.unwrap();

        let contender = store.clone();
        let seat_ids = ids.clone();
        let result = tokio::spawn(async move {
            let mut tx = contender.begin().await?;
            tx.lock_seats_for_update(event_id, &seat_ids).await
        })
        .await
        .unwrap();

        assert!(matches!(result, Err(StoreError::Transient(_))));
        holder.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn waiter_sees_committed_state_of_lock_holder() {
        let store = InMemoryBookingStore::new();
        let event_id = EventId::new();
        let ids = seed(&store, event_id, 1).await;
        let booking = BookingId::new();

        let mut holder = store.begin().await.unwrap();
        let mut seat = holder.lock_seats_for_update(event_id, &ids).await.unwrap().remove(0);

        let contender = store.clone();
        let seat_ids = ids.clone();
        let waiter = tokio::spawn(async move {
            let mut tx = contender.begin().await?;
            tx.lock_seats_for_update(event_id, &seat_ids).await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        seat.reserve(booking, Utc::now() + ChronoDuration::minutes(10), Utc::now())
            .unwrap();
        holder.update_seat(&seat).await.unwrap();
        holder.commit().await.unwrap();

        let seen = waiter.await.unwrap().unwrap();
        assert!(seen[0].is_reserved_by(booking));
    }

    #[tokio::test]
    async fn disjoint_seats_lock_in_parallel() {
        let store = InMemoryBookingStore::new().with_lock_timeout(Duration::from_millis(50));
        let event_id = EventId::new();
        let ids = seed(&store, event_id, 2).await;

        let mut first = store.begin().await.unwrap();
        first.lock_seats_for_update(event_id, &ids[..1]).await.unwrap();

        let mut second = store.begin().await.unwrap();
        let locked = second.lock_seats_for_update(event_id, &ids[1..]).await.unwrap();
        assert_eq!(locked.len(), 1);
    }

    #[tokio::test]
    async fn locks_on_missing_seats_leave_no_entries() {
        let store = InMemoryBookingStore::new();
        let event_id = EventId::new();

        for _ in 0..200 {
            let mut tx = store.begin().await.unwrap();
            let locked = tx
                .lock_seats_for_update(event_id, &[SeatId::new(), SeatId::new()])
                .await
                .unwrap();
            assert!(locked.is_empty());
            tx.rollback().await.unwrap();
        }

        assert_eq!(store.seat_locks.len(), 0);
        assert_eq!(store.seat_count().await, 0);
    }

    #[tokio::test]
    async fn released_row_locks_are_evicted() {
        let store = InMemoryBookingStore::new().with_lock_timeout(Duration::from_millis(20));
        let event_id = EventId::new();
        let ids = seed(&store, event_id, 3).await;
        assert_eq!(store.seat_locks.len(), 0);

        let mut holder = store.begin().await.unwrap();
        holder.lock_seats_for_update(event_id, &ids).await.unwrap();
        assert_eq!(store.seat_locks.len(), 3);

        // A waiter that gives up keeps the entry alive only while the holder does.
        let mut waiter = store.begin().await.unwrap();
        let timed_out = waiter.lock_seats_for_update(event_id, &ids[..1]).await;
        assert!(matches!(timed_out, Err(StoreError::Transient(_))));
        assert_eq!(store.seat_locks.len(), 3);
        drop(waiter);

        holder.rollback().await.unwrap();
        assert_eq!(store.seat_locks.len(), 0);

        let booking = pending_booking(event_id);
        let mut tx = store.begin().await.unwrap();
        tx.insert_booking(&booking).await.unwrap();
        tx.commit().await.unwrap();
        let mut tx = store.begin().await.unwrap();
        tx.lock_booking(booking.id()).await.unwrap();
        tx.lock_booking(BookingId::new()).await.unwrap();
        assert_eq!(store.booking_locks.len(), 2);
        tx.commit().await.unwrap();
        assert_eq!(store.booking_locks.len(), 0);
    }

    #[tokio::test]
    async fn insert_seat_if_absent_is_idempotent() {
        let store = InMemoryBookingStore::new();
        let event_id = EventId::new();
        let seat = SeatAvailability::available(event_id, SeatId::new(), Money::zero());

        for expected in [true, false] {
            let mut tx = store.begin().await.unwrap();
            assert_eq!(tx.insert_seat_if_absent(&seat).await.unwrap(), expected);
            tx.commit().await.unwrap();
        }
        assert_eq!(store.seat_count().await, 1);
    }

    #[tokio::test]
    async fn duplicate_booking_insert_is_rejected() {
        let store = InMemoryBookingStore::new();
        let booking = pending_booking(EventId::new());

        let mut tx = store.begin().await.unwrap();
        tx.insert_booking(&booking).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(matches!(
            tx.insert_booking(&booking).await,
            Err(StoreError::DuplicateBooking(_))
        ));
    }

    #[tokio::test]
    async fn update_booking_requires_lock() {
        let store = InMemoryBookingStore::new();
        let mut booking = pending_booking(EventId::new());

        let mut tx = store.begin().await.unwrap();
        tx.insert_booking(&booking).await.unwrap();
        tx.commit().await.unwrap();

        booking.fail_payment();
        let mut tx = store.begin().await.unwrap();
        assert!(matches!(
            tx.update_booking(&booking).await,
            Err(StoreError::BookingNotLocked(_))
        ));

        let locked = tx.lock_booking(booking.id()).await.unwrap();
        assert!(locked.is_some());
        tx.update_booking(&booking).await.unwrap();
        tx.commit().await.unwrap();

        let stored = store.get_booking(booking.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), BookingStatus::Failed);
    }

    #[tokio::test]
    async fn lock_booking_returns_none_for_unknown_id() {
        let store = InMemoryBookingStore::new();
        let mut tx = store.begin().await.unwrap();
        assert!(tx.lock_booking(BookingId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn bookings_for_user_newest_first() {
        let store = InMemoryBookingStore::new();
        let user = UserId::new();
        let event_id = EventId::new();
        let t0 = Utc::now();
        let older = Booking::new(user, event_id, ChronoDuration::minutes(10), t0);
        let newer = Booking::new(
            user,
            event_id,
            ChronoDuration::minutes(10),
            t0 + ChronoDuration::seconds(5),
        );
        let other = pending_booking(event_id);

        let mut tx = store.begin().await.unwrap();
        for b in [&older, &newer, &other] {
            tx.insert_booking(b).await.unwrap();
        }
        tx.commit().await.unwrap();

        let ids: Vec<_> = store
            .bookings_for_user(user)
            .await
            .unwrap()
            .iter()
            .map(Booking::id)
            .collect();
        assert_eq!(ids, vec![newer.id(), older.id()]);
    }

    #[tokio::test]
    async fn pending_bookings_expired_before_filters_by_status_and_deadline() {
        let store = InMemoryBookingStore::new();
        let event_id = EventId::new();
        let t0 = Utc::now();
        let expired = Booking::new(UserId::new(), event_id, ChronoDuration::minutes(10), t0);
        let live = Booking::new(
            UserId::new(),
            event_id,
            ChronoDuration::minutes(30),
            t0,
        );
        let mut confirmed = Booking::new(UserId::new(), event_id, ChronoDuration::minutes(10), t0);
        confirmed.confirm_payment().unwrap();

        let mut tx = store.begin().await.unwrap();
        for b in [&expired, &live, &confirmed] {
            tx.insert_booking(b).await.unwrap();
        }
        tx.commit().await.unwrap();

        let found = store
            .pending_bookings_expired_before(t0 + ChronoDuration::minutes(15))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id(), expired.id());
    }
}
