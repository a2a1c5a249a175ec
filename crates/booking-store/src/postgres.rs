use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{BookingId, EventId, Money, SeatId, UserId};
use domain::{
    BookedSeat, Booking, BookingRecord, BookingStatus, DomainError, SeatAvailability, SeatStatus,
};
use sqlx::{
    PgPool, Postgres, Row,
    postgres::{PgExecutor, PgPoolOptions, PgRow},
};
use uuid::Uuid;

use crate::{
    Result, StoreError,
    store::{BookingRepository, BookingStore, SeatStatusStore, StoreTransaction, lock_order},
};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// PostgreSQL-backed booking store.
///
/// Every transaction runs at `SERIALIZABLE` with a `lock_timeout`, and seat
/// rows are locked with `SELECT ... ORDER BY seat_id FOR UPDATE`.
#[derive(Clone)]
pub struct PostgresBookingStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PostgresBookingStore {
    /// Creates a new PostgreSQL booking store.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Connects to `database_url` with a pool of `max_connections`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Sets the per-transaction `lock_timeout`.
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn row_to_seat(row: &PgRow) -> Result<SeatAvailability> {
    let status: String = row.try_get("status")?;
    let status = status.parse::<SeatStatus>().map_err(StoreError::Corrupt)?;

    SeatAvailability::restore(
        EventId::from_uuid(row.try_get("event_id")?),
        SeatId::from_uuid(row.try_get("seat_id")?),
        status,
        row.try_get("reserved_until")?,
        row.try_get::<Option<Uuid>, _>("current_booking_id")?
            .map(BookingId::from_uuid),
        Money::from_cents(row.try_get("seat_price_cents")?),
    )
    .map_err(|e| StoreError::Domain(DomainError::from(e)))
}

fn row_to_booking(row: &PgRow, seats: Vec<BookedSeat>) -> Result<Booking> {
    let status: String = row.try_get("status")?;
    let status = status
        .parse::<BookingStatus>()
        .map_err(StoreError::Corrupt)?;

    Booking::restore(BookingRecord {
        id: BookingId::from_uuid(row.try_get("id")?),
        user_id: UserId::from_uuid(row.try_get("user_id")?),
        event_id: EventId::from_uuid(row.try_get("event_id")?),
        status,
        total_price: Money::from_cents(row.try_get("total_price_cents")?),
        expires_at: row.try_get("expires_at")?,
        created_at: row.try_get("created_at")?,
        seats,
    })
    .map_err(|e| StoreError::Domain(DomainError::from(e)))
}

/// Loads the booked seats of several bookings, grouped by booking.
async fn fetch_booked_seats<'e, E>(
    executor: E,
    booking_ids: Vec<Uuid>,
) -> Result<HashMap<Uuid, Vec<BookedSeat>>>
where
    E: PgExecutor<'e>,
{
    let rows = sqlx::query(
        r#"
        SELECT booking_id, seat_id, price_at_booking_cents
        FROM booked_seats
        WHERE booking_id = ANY($1)
        ORDER BY booking_id, position
        "#,
    )
    .bind(booking_ids)
    .fetch_all(executor)
    .await?;

    let mut grouped: HashMap<Uuid, Vec<BookedSeat>> = HashMap::new();
    for row in rows {
        let booking_id: Uuid = row.try_get("booking_id")?;
        let seat = BookedSeat::new(
            SeatId::from_uuid(row.try_get("seat_id")?),
            Money::from_cents(row.try_get("price_at_booking_cents")?),
        );
        grouped.entry(booking_id).or_default().push(seat);
    }
    Ok(grouped)
}

async fn bookings_from_rows<'e, E>(executor: E, rows: Vec<PgRow>) -> Result<Vec<Booking>>
where
    E: PgExecutor<'e>,
{
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let ids = rows
        .iter()
        .map(|row| row.try_get::<Uuid, _>("id"))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let mut seats = fetch_booked_seats(executor, ids).await?;

    rows.iter()
        .map(|row| {
            let id: Uuid = row.try_get("id")?;
            row_to_booking(row, seats.remove(&id).unwrap_or_default())
        })
        .collect()
}

/// Transaction over a [`PostgresBookingStore`].
pub struct PostgresTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
    locked_seats: HashSet<(EventId, SeatId)>,
    locked_bookings: HashSet<BookingId>,
}

#[async_trait]
impl SeatStatusStore for PostgresTransaction {
    #[tracing::instrument(skip(self, seat_ids), fields(seats = seat_ids.len()))]
    async fn lock_seats_for_update(
        &mut self,
        event_id: EventId,
        seat_ids: &[SeatId],
    ) -> Result<Vec<SeatAvailability>> {
        let ordered: Vec<Uuid> = lock_order(seat_ids)
            .iter()
            .map(SeatId::as_uuid)
            .collect();

        let rows = sqlx::query(
            r#"
            SELECT event_id, seat_id, status, reserved_until, current_booking_id, seat_price_cents
            FROM seat_availability
            WHERE event_id = $1 AND seat_id = ANY($2)
            ORDER BY seat_id
            FOR UPDATE
            "#,
        )
        .bind(event_id.as_uuid())
        .bind(ordered)
        .fetch_all(&mut *self.tx)
        .await?;

        let seats = rows.iter().map(row_to_seat).collect::<Result<Vec<_>>>()?;
        self.locked_seats
            .extend(seats.iter().map(|s| (s.event_id(), s.seat_id())));
        Ok(seats)
    }

    async fn update_seat(&mut self, seat: &SeatAvailability) -> Result<()> {
        let key = (seat.event_id(), seat.seat_id());
        if !self.locked_seats.contains(&key) {
            return Err(StoreError::SeatNotLocked {
                event_id: key.0,
                seat_id: key.1,
            });
        }

        sqlx::query(
            r#"
            UPDATE seat_availability
            SET status = $3, reserved_until = $4, current_booking_id = $5, seat_price_cents = $6
            WHERE event_id = $1 AND seat_id = $2
            "#,
        )
        .bind(seat.event_id().as_uuid())
        .bind(seat.seat_id().as_uuid())
        .bind(seat.status().as_str())
        .bind(seat.reserved_until())
        .bind(seat.current_booking_id().map(|id| id.as_uuid()))
        .bind(seat.seat_price().cents())
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn insert_seat_if_absent(&mut self, seat: &SeatAvailability) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO seat_availability
                (event_id, seat_id, status, reserved_until, current_booking_id, seat_price_cents)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (event_id, seat_id) DO NOTHING
            "#,
        )
        .bind(seat.event_id().as_uuid())
        .bind(seat.seat_id().as_uuid())
        .bind(seat.status().as_str())
        .bind(seat.reserved_until())
        .bind(seat.current_booking_id().map(|id| id.as_uuid()))
        .bind(seat.seat_price().cents())
        .execute(&mut *self.tx)
        .await?;

        let inserted = result.rows_affected() == 1;
        if inserted {
            self.locked_seats.insert((seat.event_id(), seat.seat_id()));
        }
        Ok(inserted)
    }
}

#[async_trait]
impl BookingRepository for PostgresTransaction {
    async fn lock_booking(&mut self, booking_id: BookingId) -> Result<Option<Booking>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, event_id, status, total_price_cents, expires_at, created_at
            FROM bookings
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(booking_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut seats = fetch_booked_seats(&mut *self.tx, vec![booking_id.as_uuid()]).await?;
        let booking = row_to_booking(&row, seats.remove(&booking_id.as_uuid()).unwrap_or_default())?;
        self.locked_bookings.insert(booking_id);
        Ok(Some(booking))
    }

    async fn insert_booking(&mut self, booking: &Booking) -> Result<()> {
        let booking_id = booking.id();

        sqlx::query(
            r#"
            INSERT INTO bookings (id, user_id, event_id, status, total_price_cents, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(booking_id.as_uuid())
        .bind(booking.user_id().as_uuid())
        .bind(booking.event_id().as_uuid())
        .bind(booking.status().as_str())
        .bind(booking.total_price().cents())
        .bind(booking.expires_at())
        .bind(booking.created_at())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("bookings_pkey")
            {
                return StoreError::DuplicateBooking(booking_id);
            }
            StoreError::from(e)
        })?;

        for (position, seat) in booking.seats().iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO booked_seats (booking_id, seat_id, price_at_booking_cents, position)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(booking_id.as_uuid())
            .bind(seat.seat_id().as_uuid())
            .bind(seat.price_at_booking().cents())
            .bind(position as i32)
            .execute(&mut *self.tx)
            .await?;
        }

        self.locked_bookings.insert(booking_id);
        Ok(())
    }

    async fn update_booking(&mut self, booking: &Booking) -> Result<()> {
        let booking_id = booking.id();
        if !self.locked_bookings.contains(&booking_id) {
            return Err(StoreError::BookingNotLocked(booking_id));
        }

        let result = sqlx::query(
            r#"
            UPDATE bookings
            SET status = $2, expires_at = $3, total_price_cents = $4
            WHERE id = $1
            "#,
        )
        .bind(booking_id.as_uuid())
        .bind(booking.status().as_str())
        .bind(booking.expires_at())
        .bind(booking.total_price().cents())
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::BookingNotFound(booking_id));
        }
        Ok(())
    }
}

#[async_trait]
impl StoreTransaction for PostgresTransaction {
    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl BookingStore for PostgresBookingStore {
    type Transaction = PostgresTransaction;

    async fn begin(&self) -> Result<Self::Transaction> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;
        // SET does not accept bind parameters; the value is an integer we format ourselves.
        let set_lock_timeout = format!(
            "SET LOCAL lock_timeout = '{}ms'",
            self.lock_timeout.as_millis()
        );
        sqlx::query(&set_lock_timeout).execute(&mut *tx).await?;

        Ok(PostgresTransaction {
            tx,
            locked_seats: HashSet::new(),
            locked_bookings: HashSet::new(),
        })
    }

    async fn get_booking(&self, booking_id: BookingId) -> Result<Option<Booking>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, event_id, status, total_price_cents, expires_at, created_at
            FROM bookings
            WHERE id = $1
            "#,
        )
        .bind(booking_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        Ok(bookings_from_rows(&self.pool, rows).await?.pop())
    }

    async fn bookings_for_user(&self, user_id: UserId) -> Result<Vec<Booking>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, event_id, status, total_price_cents, expires_at, created_at
            FROM bookings
            WHERE user_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        bookings_from_rows(&self.pool, rows).await
    }

    async fn get_seat(
        &self,
        event_id: EventId,
        seat_id: SeatId,
    ) -> Result<Option<SeatAvailability>> {
        let row = sqlx::query(
            r#"
            SELECT event_id, seat_id, status, reserved_until, current_booking_id, seat_price_cents
            FROM seat_availability
            WHERE event_id = $1 AND seat_id = $2
            "#,
        )
        .bind(event_id.as_uuid())
        .bind(seat_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_seat).transpose()
    }

    async fn seats_for_event(&self, event_id: EventId) -> Result<Vec<SeatAvailability>> {
        let rows = sqlx::query(
            r#"
            SELECT event_id, seat_id, status, reserved_until, current_booking_id, seat_price_cents
            FROM seat_availability
            WHERE event_id = $1
            ORDER BY seat_id
            "#,
        )
        .bind(event_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_seat).collect()
    }

    async fn pending_bookings_expired_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Booking>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, event_id, status, total_price_cents, expires_at, created_at
            FROM bookings
            WHERE status = 'PendingPayment' AND expires_at < $1
            ORDER BY expires_at ASC
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        bookings_from_rows(&self.pool, rows).await
    }
}
