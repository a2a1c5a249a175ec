//! Reservation races against PostgreSQL
//!
//! These tests use a shared PostgreSQL container. Run with:
//!
//! ```bash
//! cargo test -p saga --test postgres_reservation
//! ```

use std::sync::Arc;
use std::time::Duration;

use booking_store::{BookingStore, PostgresBookingStore};
use chrono::Utc;
use common::{EventId, Money, SeatId, SystemClock, UserId, VenueId};
use domain::SeatStatus;
use futures_util::future::join_all;
use saga::{
    BookingConfirmation, CreateBooking, EventApproved, EventSeatSeeder, InMemoryMessageBus,
    InMemorySeatPriceLookup, ReservationError, ReservationOrchestrator, ReservationSettings,
};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

const CONTENDERS: usize = 8;

type PgOrchestrator =
    ReservationOrchestrator<PostgresBookingStore, InMemoryMessageBus, InMemorySeatPriceLookup>;

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_booking_tables.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// A store with enough connections for every contender and cleared tables.
async fn get_test_store() -> PostgresBookingStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(CONTENDERS as u32 + 2)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE booked_seats, bookings, seat_availability")
        .execute(&pool)
        .await
        .unwrap();

    PostgresBookingStore::new(pool).with_lock_timeout(Duration::from_secs(2))
}

async fn approve_event(store: &PostgresBookingStore, seats: usize) -> (EventId, Vec<SeatId>) {
    let event_id = EventId::new();
    let seat_ids: Vec<SeatId> = (0..seats).map(|_| SeatId::new()).collect();
    EventSeatSeeder::new(store.clone())
        .on_event_approved(&EventApproved {
            event_id,
            venue_id: VenueId::new(),
            seat_ids: seat_ids.clone(),
            timestamp: Utc::now(),
        })
        .await
        .unwrap();
    (event_id, seat_ids)
}

fn orchestrator(store: &PostgresBookingStore, bus: &InMemoryMessageBus) -> Arc<PgOrchestrator> {
    Arc::new(ReservationOrchestrator::new(
        store.clone(),
        bus.clone(),
        InMemorySeatPriceLookup::with_default_price(Money::from_major(50)),
        Arc::new(SystemClock),
        ReservationSettings::default(),
    ))
}

/// Splits race results into winners and the number of clean conflicts.
/// Anything other than a conflict fails the test.
fn tally(
    results: Vec<Result<BookingConfirmation, ReservationError>>,
) -> (Vec<BookingConfirmation>, usize) {
    let mut winners = Vec::new();
    let mut conflicts = 0;
    for result in results {
        match result {
            Ok(confirmation) => winners.push(confirmation),
            Err(ReservationError::SeatsUnavailable { .. }) => conflicts += 1,
            Err(other) => panic!("expected a booking or a seat conflict, got {other:?}"),
        }
    }
    (winners, conflicts)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_concurrent_single_seat_bookings_have_one_winner() {
    let store = get_test_store().await;
    let bus = InMemoryMessageBus::new();
    let orchestrator = orchestrator(&store, &bus);
    let (event_id, seats) = approve_event(&store, 1).await;

    let attempts = (0..CONTENDERS).map(|_| {
        let orchestrator = Arc::clone(&orchestrator);
        let seat_ids = seats.clone();
        tokio::spawn(async move {
            orchestrator
                .create_booking(CreateBooking::new(
                    UserId::new(),
                    event_id,
                    seat_ids,
                    "10.0.0.1",
                ))
                .await
        })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let (winners, conflicts) = tally(results);
    assert_eq!(winners.len(), 1);
    assert_eq!(conflicts, CONTENDERS - 1);

    let winner = winners[0].booking.id();
    let seat = store.get_seat(event_id, seats[0]).await.unwrap().unwrap();
    assert_eq!(seat.status(), SeatStatus::Reserved);
    assert!(seat.is_reserved_by(winner));
    assert_eq!(seat.seat_price(), Money::from_major(50));

    let stored = store.get_booking(winner).await.unwrap().unwrap();
    assert_eq!(stored.seat_ids(), seats);
    assert_eq!(bus.published_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_overlapping_requests_in_any_order_do_not_deadlock() {
    let store = get_test_store().await;
    let bus = InMemoryMessageBus::new();
    let orchestrator = orchestrator(&store, &bus);
    let (event_id, seats) = approve_event(&store, 2).await;

    let attempts = (0..CONTENDERS).map(|i| {
        let orchestrator = Arc::clone(&orchestrator);
        let seat_ids = if i % 2 == 0 {
            vec![seats[0], seats[1]]
        } else {
            vec![seats[1], seats[0]]
        };
        tokio::spawn(async move {
            orchestrator
                .create_booking(CreateBooking::new(
                    UserId::new(),
                    event_id,
                    seat_ids,
                    "10.0.0.2",
                ))
                .await
        })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let (winners, conflicts) = tally(results);
    assert_eq!(winners.len(), 1);
    assert_eq!(conflicts, CONTENDERS - 1);

    let winner = winners[0].booking.id();
    for seat_id in &seats {
        let seat = store.get_seat(event_id, *seat_id).await.unwrap().unwrap();
        assert!(seat.is_reserved_by(winner));
    }
    assert_eq!(winners[0].booking.total_price(), Money::from_major(100));
    assert_eq!(bus.published_count(), 1);
}
