//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `ReservationStore` port from the `booking_core` crate. It handles all
//! interactions with the PostgreSQL database using `sqlx`.
//!
//! The `booking_no_overlap` exclusion constraint backs up the engine's own
//! conflict check; a violation surfaces as `PortError::Conflict`.

use async_trait::async_trait;
use booking_core::{
    BibId, Booking, BookingId, BookingState, DayOfWeek, Interval, ItemId, LoanId, PortError, PortResult, Reservation,
    ReservationStore,
};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `ReservationStore` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

/// SQLSTATEs raised when a write would double-book or orphan something.
const EXCLUSION_VIOLATION: &str = "23P01";
const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";

fn write_error(e: sqlx::Error) -> PortError {
    if let sqlx::Error::Database(db_err) = &e {
        if let Some(code) = db_err.code() {
            if matches!(code.as_ref(), EXCLUSION_VIOLATION | UNIQUE_VIOLATION | FOREIGN_KEY_VIOLATION) {
                return PortError::Conflict(db_err.message().to_string());
            }
        }
    }
    PortError::Unexpected(e.to_string())
}

fn read_error(what: impl FnOnce() -> String) -> impl FnOnce(sqlx::Error) -> PortError {
    move |e| match e {
        sqlx::Error::RowNotFound => PortError::NotFound(what()),
        _ => PortError::Unexpected(e.to_string()),
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct ReservationRecord {
    id: Uuid,
    bib_id: String,
    username: String,
    created_by: Option<String>,
    repeat_on: i16,
    end_repeating_on: Option<DateTime<Utc>>,
    created_on: DateTime<Utc>,
}
impl ReservationRecord {
    fn to_domain(self) -> PortResult<Reservation> {
        let repeat_on = DayOfWeek::new(i32::from(self.repeat_on)).ok_or_else(|| {
            PortError::Unexpected(format!("Reservation {} has invalid repeat days {}", self.id, self.repeat_on))
        })?;
        Ok(Reservation {
            id: self.id,
            bib_id: BibId(self.bib_id),
            user: self.username,
            created_by: self.created_by,
            repeat_on,
            end_repeating_on: self.end_repeating_on,
            created_on: self.created_on,
        })
    }
}

#[derive(FromRow)]
struct BookingRecord {
    id: String,
    reservation_id: Uuid,
    bib_id: String,
    start_at: DateTime<Utc>,
    end_at: DateTime<Utc>,
    state: i16,
    item_id: Option<String>,
    loan_id: Option<String>,
    created_on: DateTime<Utc>,
    loaned_on: Option<DateTime<Utc>>,
    returned_on: Option<DateTime<Utc>>,
}
impl BookingRecord {
    fn to_domain(self) -> PortResult<Booking> {
        let state = BookingState::from_code(self.state)
            .ok_or_else(|| PortError::Unexpected(format!("Booking {} has invalid state {}", self.id, self.state)))?;
        Ok(Booking {
            id: BookingId(self.id),
            reservation_id: self.reservation_id,
            bib_id: BibId(self.bib_id),
            interval: Interval::new(self.start_at, self.end_at),
            state,
            item_id: self.item_id.map(ItemId),
            loan_id: self.loan_id.map(LoanId),
            created_on: self.created_on,
            loaned_on: self.loaned_on,
            returned_on: self.returned_on,
        })
    }
}

fn bookings_to_domain(records: Vec<BookingRecord>) -> PortResult<Vec<Booking>> {
    records.into_iter().map(BookingRecord::to_domain).collect()
}

const BOOKING_COLUMNS: &str =
    "b.id, b.reservation_id, b.bib_id, b.start_at, b.end_at, b.state, b.item_id, b.loan_id, b.created_on, b.loaned_on, b.returned_on";

//=========================================================================================
// `ReservationStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl ReservationStore for DbAdapter {
    async fn insert_reservation(&self, reservation: &Reservation) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO reservation (id, bib_id, username, created_by, repeat_on, end_repeating_on, created_on) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(reservation.id)
        .bind(reservation.bib_id.as_str())
        .bind(&reservation.user)
        .bind(&reservation.created_by)
        .bind(i16::from(reservation.repeat_on.bits()))
        .bind(reservation.end_repeating_on)
        .bind(reservation.created_on)
        .execute(&self.pool)
        .await
        .map_err(write_error)?;
        Ok(())
    }

    async fn get_reservation(&self, reservation_id: Uuid) -> PortResult<Reservation> {
        let record = sqlx::query_as::<_, ReservationRecord>(
            "SELECT id, bib_id, username, created_by, repeat_on, end_repeating_on, created_on \
             FROM reservation WHERE id = $1",
        )
        .bind(reservation_id)
        .fetch_one(&self.pool)
        .await
        .map_err(read_error(|| format!("Reservation {} not found", reservation_id)))?;
        record.to_domain()
    }

    async fn delete_reservation(&self, reservation_id: Uuid) -> PortResult<()> {
        sqlx::query("DELETE FROM reservation WHERE id = $1")
            .bind(reservation_id)
            .execute(&self.pool)
            .await
            .map_err(write_error)?;
        Ok(())
    }

    async fn insert_booking(&self, booking: &Booking) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO booking (id, reservation_id, bib_id, start_at, end_at, state, item_id, loan_id, created_on, loaned_on, returned_on) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(booking.id.as_str())
        .bind(booking.reservation_id)
        .bind(booking.bib_id.as_str())
        .bind(booking.interval.start)
        .bind(booking.interval.end)
        .bind(booking.state.code())
        .bind(booking.item_id.as_ref().map(|i| i.as_str()))
        .bind(booking.loan_id.as_ref().map(|l| l.as_str()))
        .bind(booking.created_on)
        .bind(booking.loaned_on)
        .bind(booking.returned_on)
        .execute(&self.pool)
        .await
        .map_err(write_error)?;
        Ok(())
    }

    async fn get_booking(&self, booking_id: &BookingId) -> PortResult<Booking> {
        let record = sqlx::query_as::<_, BookingRecord>(&format!("SELECT {BOOKING_COLUMNS} FROM booking b WHERE b.id = $1"))
            .bind(booking_id.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(read_error(|| format!("Booking {} not found", booking_id)))?;
        record.to_domain()
    }

    async fn update_booking(&self, booking: &Booking) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE booking SET state = $2, item_id = $3, loan_id = $4, loaned_on = $5, returned_on = $6 WHERE id = $1",
        )
        .bind(booking.id.as_str())
        .bind(booking.state.code())
        .bind(booking.item_id.as_ref().map(|i| i.as_str()))
        .bind(booking.loan_id.as_ref().map(|l| l.as_str()))
        .bind(booking.loaned_on)
        .bind(booking.returned_on)
        .execute(&self.pool)
        .await
        .map_err(write_error)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Booking {} not found", booking.id)));
        }
        Ok(())
    }

    async fn delete_booking(&self, booking_id: &BookingId) -> PortResult<()> {
        sqlx::query("DELETE FROM booking WHERE id = $1")
            .bind(booking_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(write_error)?;
        Ok(())
    }

    async fn bookings_for_reservation(&self, reservation_id: Uuid) -> PortResult<Vec<Booking>> {
        let records = sqlx::query_as::<_, BookingRecord>(&format!(
            "SELECT {BOOKING_COLUMNS} FROM booking b WHERE b.reservation_id = $1 ORDER BY b.start_at"
        ))
        .bind(reservation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;
        bookings_to_domain(records)
    }

    async fn intervals_overlapping(&self, bib_id: &BibId, window: &Interval) -> PortResult<Vec<Interval>> {
        let rows = sqlx::query_as::<_, (DateTime<Utc>, DateTime<Utc>)>(
            "SELECT start_at, end_at FROM booking WHERE bib_id = $1 AND start_at < $3 AND end_at > $2",
        )
        .bind(bib_id.as_str())
        .bind(window.start)
        .bind(window.end)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(rows.into_iter().map(|(start, end)| Interval::new(start, end)).collect())
    }

    async fn bookings_for_user(&self, user: &str, ending_after: DateTime<Utc>) -> PortResult<Vec<Booking>> {
        let records = sqlx::query_as::<_, BookingRecord>(&format!(
            "SELECT {BOOKING_COLUMNS} FROM booking b JOIN reservation r ON r.id = b.reservation_id \
             WHERE r.username = $1 AND b.end_at >= $2 ORDER BY b.start_at"
        ))
        .bind(user)
        .bind(ending_after)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;
        bookings_to_domain(records)
    }

    async fn bookings_between(&self, window: &Interval) -> PortResult<Vec<Booking>> {
        let records = sqlx::query_as::<_, BookingRecord>(&format!(
            "SELECT {BOOKING_COLUMNS} FROM booking b WHERE b.start_at >= $1 AND b.end_at < $2 ORDER BY b.start_at"
        ))
        .bind(window.start)
        .bind(window.end)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;
        bookings_to_domain(records)
    }
}
