use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{Booking, BookingStatus, BookingSummary};
use crate::{BookingError, BookingResult};

/// Repository trait for booking records
#[async_trait]
pub trait BookingRepository: Send + Sync {
    async fn save(&self, booking: &Booking) -> BookingResult<()>;

    async fn get(&self, id: Uuid) -> BookingResult<Option<Booking>>;

    /// Newest first.
    async fn list_for_user(&self, user_id: &str) -> BookingResult<Vec<Booking>>;

    /// Sets `to` only while the stored status is still `from`.
    /// Returns false when another writer got there first.
    async fn transition_status(&self, id: Uuid, from: BookingStatus, to: BookingStatus) -> BookingResult<bool>;

    /// Totals plus the `recent` newest bookings.
    async fn summary(&self, recent: usize) -> BookingResult<BookingSummary>;
}

#[derive(Default)]
pub struct InMemoryBookingRepository {
    bookings: RwLock<HashMap<Uuid, Booking>>,
}

impl InMemoryBookingRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BookingRepository for InMemoryBookingRepository {
    async fn save(&self, booking: &Booking) -> BookingResult<()> {
        self.bookings.write().await.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> BookingResult<Option<Booking>> {
        Ok(self.bookings.read().await.get(&id).cloned())
    }

    async fn list_for_user(&self, user_id: &str) -> BookingResult<Vec<Booking>> {
        let mut bookings: Vec<Booking> = self
            .bookings
            .read()
            .await
            .values()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect();
        bookings.sort_by(|a, b| b.booking_date.cmp(&a.booking_date));
        Ok(bookings)
    }

    async fn transition_status(&self, id: Uuid, from: BookingStatus, to: BookingStatus) -> BookingResult<bool> {
        let mut bookings = self.bookings.write().await;
        let booking = bookings.get_mut(&id).ok_or(BookingError::NotFound(id))?;
        if booking.status != from {
            return Ok(false);
        }
        booking.status = to;
        Ok(true)
    }

    async fn summary(&self, recent: usize) -> BookingResult<BookingSummary> {
        let bookings = self.bookings.read().await;
        let total_revenue = bookings
            .values()
            .filter(|b| b.status == BookingStatus::Confirmed)
            .map(|b| b.total_amount)
            .sum();

        let mut newest: Vec<Booking> = bookings.values().cloned().collect();
        newest.sort_by(|a, b| b.booking_date.cmp(&a.booking_date));
        newest.truncate(recent);

        Ok(BookingSummary {
            total_bookings: bookings.len() as u64,
            total_revenue,
            recent_bookings: newest,
        })
    }
}
