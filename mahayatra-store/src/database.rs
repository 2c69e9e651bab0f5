use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use mahayatra_booking::{
    Booking, BookingError, BookingRepository, BookingResult, BookingStatus, BookingSummary, Passenger, PaymentStatus,
};
use mahayatra_core::{BusId, SessionId};
use mahayatra_shared::Masked;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{FromRow, Pool, Postgres};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

#[derive(Clone)]
pub struct DbClient {
    pub pool: Pool<Postgres>,
}

impl DbClient {
    pub async fn new(connection_string: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(3))
            .connect(connection_string)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("Running database migrations...");
        sqlx::migrate!("../migrations").run(&self.pool).await?;
        info!("Migrations completed successfully.");
        Ok(())
    }
}

#[derive(FromRow)]
struct BookingRow {
    id: Uuid,
    pnr: String,
    bus_id: String,
    session_id: String,
    user_id: String,
    passengers: Json<Vec<Passenger>>,
    contact_email: String,
    contact_phone: String,
    total_seats: i32,
    total_amount: i64,
    status: String,
    payment_status: String,
    booking_date: DateTime<Utc>,
    journey_date: NaiveDate,
}

impl TryFrom<BookingRow> for Booking {
    type Error = BookingError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        let corrupt = |field: &str| BookingError::Repository(format!("booking {} has invalid {}", row.id, field));

        let status = BookingStatus::parse(&row.status).ok_or_else(|| corrupt("status"))?;
        let payment_status = match row.payment_status.as_str() {
            "Pending" => PaymentStatus::Pending,
            _ => return Err(corrupt("payment_status")),
        };
        let session_id = SessionId::parse(&row.session_id).map_err(|_| corrupt("session_id"))?;
        let total_seats = u32::try_from(row.total_seats).map_err(|_| corrupt("total_seats"))?;
        let total_amount = u64::try_from(row.total_amount).map_err(|_| corrupt("total_amount"))?;

        Ok(Booking {
            id: row.id,
            pnr: row.pnr,
            bus_id: BusId::new(row.bus_id),
            session_id,
            user_id: row.user_id,
            passengers: row.passengers.0,
            contact_email: Masked::new(row.contact_email),
            contact_phone: Masked::new(row.contact_phone),
            total_seats,
            total_amount,
            status,
            payment_status,
            booking_date: row.booking_date,
            journey_date: row.journey_date,
        })
    }
}

fn db_err(e: sqlx::Error) -> BookingError {
    BookingError::Repository(e.to_string())
}

const SELECT_BOOKING: &str = "SELECT id, pnr, bus_id, session_id, user_id, passengers, contact_email, contact_phone, \
     total_seats, total_amount, status, payment_status, booking_date, journey_date FROM bookings";

/// Booking records in Postgres.
pub struct PgBookingRepository {
    db: DbClient,
}

impl PgBookingRepository {
    pub fn new(db: DbClient) -> Self {
        Self { db }
    }
}

#[async_trait]
impl BookingRepository for PgBookingRepository {
    async fn save(&self, booking: &Booking) -> BookingResult<()> {
        sqlx::query(
            "INSERT INTO bookings (id, pnr, bus_id, session_id, user_id, passengers, contact_email, contact_phone, \
             total_seats, total_amount, status, payment_status, booking_date, journey_date) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
        )
        .bind(booking.id)
        .bind(&booking.pnr)
        .bind(booking.bus_id.as_str())
        .bind(booking.session_id.as_str())
        .bind(&booking.user_id)
        .bind(Json(&booking.passengers))
        .bind(booking.contact_email.expose())
        .bind(booking.contact_phone.expose())
        .bind(booking.total_seats as i32)
        .bind(booking.total_amount as i64)
        .bind(booking.status.as_str())
        .bind("Pending")
        .bind(booking.booking_date)
        .bind(booking.journey_date)
        .execute(&self.db.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> BookingResult<Option<Booking>> {
        let row: Option<BookingRow> = sqlx::query_as(&format!("{} WHERE id = $1", SELECT_BOOKING))
            .bind(id)
            .fetch_optional(&self.db.pool)
            .await
            .map_err(db_err)?;
        row.map(Booking::try_from).transpose()
    }

    async fn list_for_user(&self, user_id: &str) -> BookingResult<Vec<Booking>> {
        let rows: Vec<BookingRow> =
            sqlx::query_as(&format!("{} WHERE user_id = $1 ORDER BY booking_date DESC", SELECT_BOOKING))
                .bind(user_id)
                .fetch_all(&self.db.pool)
                .await
                .map_err(db_err)?;
        rows.into_iter().map(Booking::try_from).collect()
    }

    async fn transition_status(&self, id: Uuid, from: BookingStatus, to: BookingStatus) -> BookingResult<bool> {
        let result = sqlx::query("UPDATE bookings SET status = $1 WHERE id = $2 AND status = $3")
            .bind(to.as_str())
            .bind(id)
            .bind(from.as_str())
            .execute(&self.db.pool)
            .await
            .map_err(db_err)?;
        if result.rows_affected() == 1 {
            return Ok(true);
        }

        let exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM bookings WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db.pool)
            .await
            .map_err(db_err)?;
        match exists {
            Some(_) => Ok(false),
            None => Err(BookingError::NotFound(id)),
        }
    }

    async fn summary(&self, recent: usize) -> BookingResult<BookingSummary> {
        let (total_bookings, total_revenue): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), \
             COALESCE(SUM(total_amount) FILTER (WHERE status = 'Confirmed'), 0)::BIGINT FROM bookings",
        )
        .fetch_one(&self.db.pool)
        .await
        .map_err(db_err)?;

        let rows: Vec<BookingRow> = sqlx::query_as(&format!("{} ORDER BY booking_date DESC LIMIT $1", SELECT_BOOKING))
            .bind(recent as i64)
            .fetch_all(&self.db.pool)
            .await
            .map_err(db_err)?;

        Ok(BookingSummary {
            total_bookings: total_bookings.max(0) as u64,
            total_revenue: total_revenue.max(0) as u64,
            recent_bookings: rows.into_iter().map(Booking::try_from).collect::<BookingResult<_>>()?,
        })
    }
}
