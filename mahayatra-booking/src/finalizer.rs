use mahayatra_core::{LockError, LockManager};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::models::{AdminStats, Booking, BookingStatus, CreateBookingRequest};
use crate::repository::BookingRepository;
use crate::validation::validate_request;
use crate::{BookingError, BookingResult};

/// How many bookings the admin dashboard lists.
pub const RECENT_BOOKINGS: usize = 10;

/// Turns a session's held seats plus passenger details into a booking.
pub struct BookingFinalizer {
    locks: Arc<LockManager>,
    bookings: Arc<dyn BookingRepository>,
}

impl BookingFinalizer {
    pub fn new(locks: Arc<LockManager>, bookings: Arc<dyn BookingRepository>) -> Self {
        Self { locks, bookings }
    }

    /// Re-validates every hold and books the seats, or fails with
    /// `HoldExpired` leaving seat state and bookings untouched.
    pub async fn finalize(&self, user_id: &str, request: CreateBookingRequest) -> BookingResult<Booking> {
        validate_request(&request)?;

        let bus = self.locks.seat_map(&request.bus_id).await?;
        let seats = request.seat_numbers();

        let consumed = match self.locks.confirm_holds(&bus.id, &seats, &request.session_id).await {
            Ok(consumed) => consumed,
            Err(LockError::HoldExpired(lapsed)) => return Err(BookingError::HoldExpired(lapsed)),
            Err(e) => return Err(e.into()),
        };

        let booking = Booking::confirmed(user_id, &bus, request);
        if let Err(e) = self.bookings.save(&booking).await {
            error!("Failed to persist booking {}: {}", booking.id, e);
            // Seats are booked but nothing references them yet; the session gets its holds back.
            match self.locks.reinstate_holds(&booking.bus_id, &consumed).await {
                Ok(held) => warn!("Seats {:?} on bus {} returned to {}", held, booking.bus_id, booking.session_id),
                Err(undo_err) => error!(
                    "Failed to roll back seats {:?} on bus {}: {}",
                    seats, booking.bus_id, undo_err
                ),
            }
            return Err(e);
        }

        info!(
            "Booking confirmed: {} (PNR {}) on bus {} seats {:?}",
            booking.id, booking.pnr, booking.bus_id, seats
        );
        Ok(booking)
    }

    pub async fn get_booking(&self, id: Uuid) -> BookingResult<Booking> {
        self.bookings.get(id).await?.ok_or(BookingError::NotFound(id))
    }

    pub async fn list_user_bookings(&self, user_id: &str) -> BookingResult<Vec<Booking>> {
        self.bookings.list_for_user(user_id).await
    }

    /// Cancels the caller's booking and returns its seats to the pool.
    ///
    /// Only the call that moves the stored status from Confirmed frees seats;
    /// a racing cancel gets `AlreadyCancelled`. Returns the seats actually freed.
    pub async fn cancel_booking(&self, id: Uuid, user_id: &str) -> BookingResult<(Booking, Vec<String>)> {
        let mut booking = self.get_booking(id).await?;
        if booking.user_id != user_id {
            warn!("User {} tried to cancel booking {} owned by someone else", user_id, id);
            return Err(BookingError::Forbidden);
        }

        booking.cancel()?;
        let won = self
            .bookings
            .transition_status(id, BookingStatus::Confirmed, BookingStatus::Cancelled)
            .await?;
        if !won {
            warn!("Booking {} was cancelled concurrently", id);
            return Err(BookingError::AlreadyCancelled(id));
        }
        let freed = self.locks.free_seats(&booking.bus_id, &booking.seat_numbers()).await?;

        info!("Booking cancelled: {} (PNR {}) freed {:?}", booking.id, booking.pnr, freed);
        Ok((booking, freed))
    }

    pub async fn admin_stats(&self) -> BookingResult<AdminStats> {
        let summary = self.bookings.summary(RECENT_BOOKINGS).await?;
        let total_buses = self.locks.bus_count().await? as u64;
        Ok(AdminStats {
            total_buses,
            total_bookings: summary.total_bookings,
            total_revenue: summary.total_revenue,
            recent_bookings: summary.recent_bookings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BookingSummary, Gender, Passenger};
    use crate::repository::InMemoryBookingRepository;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::{Notify, Semaphore};
    use chrono::{Duration, NaiveDate};
    use mahayatra_core::{BusId, HoldPolicy, InMemorySeatStore, ManualClock, NewBus, SessionId};
    use mahayatra_shared::Masked;

    struct Fixture {
        finalizer: BookingFinalizer,
        locks: Arc<LockManager>,
        clock: Arc<ManualClock>,
        bus_id: BusId,
    }

    async fn fixture_with(bookings: Arc<dyn BookingRepository>) -> Fixture {
        let clock = Arc::new(ManualClock::default());
        let locks = Arc::new(LockManager::new(
            Arc::new(InMemorySeatStore::new()),
            clock.clone(),
            HoldPolicy::default(),
        ));
        let bus = locks
            .register_bus(NewBus {
                id: Some(BusId::from("bus-7")),
                bus_name: "Neeta Travels".to_string(),
                bus_type: "Non-AC Seater".to_string(),
                from: "Pune".to_string(),
                to: "Goa".to_string(),
                departure_time: "19:00".to_string(),
                arrival_time: "07:00".to_string(),
                journey_date: NaiveDate::from_ymd_opt(2026, 12, 20).unwrap(),
                price: 900,
                total_seats: 8,
                seat_numbers: None,
            })
            .await
            .unwrap();

        Fixture {
            finalizer: BookingFinalizer::new(locks.clone(), bookings),
            locks,
            clock,
            bus_id: bus.id,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with(Arc::new(InMemoryBookingRepository::new())).await
    }

    fn request(bus_id: &BusId, session: &SessionId, seats: &[&str]) -> CreateBookingRequest {
        CreateBookingRequest {
            bus_id: bus_id.clone(),
            session_id: session.clone(),
            passengers: seats
                .iter()
                .map(|s| Passenger {
                    name: format!("Passenger {}", s),
                    age: 30,
                    gender: Gender::Male,
                    seat_number: s.to_string(),
                })
                .collect(),
            contact_email: Masked::from("rohan@example.in"),
            contact_phone: Masked::from("9123456780"),
        }
    }

    fn seats(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_finalize_books_held_seats() {
        let fx = fixture().await;
        let a = SessionId::parse("session_a").unwrap();
        fx.locks.lock_seats(&fx.bus_id, &seats(&["S1", "S2"]), &a).await.unwrap();

        let booking = fx
            .finalizer
            .finalize("user-1", request(&fx.bus_id, &a, &["S1", "S2"]))
            .await
            .unwrap();
        assert_eq!(booking.status, BookingStatus::Confirmed);
        assert_eq!(booking.total_seats, 2);
        assert_eq!(booking.total_amount, 1800);
        assert!(booking.pnr.starts_with("MY"));

        let bus = fx.locks.seat_map(&fx.bus_id).await.unwrap();
        assert!(bus.seat("S1").unwrap().is_booked);
        assert!(!bus.seat("S1").unwrap().is_locked);

        let fetched = fx.finalizer.get_booking(booking.id).await.unwrap();
        assert_eq!(fetched.pnr, booking.pnr);
        assert_eq!(fx.finalizer.list_user_bookings("user-1").await.unwrap().len(), 1);
        assert!(fx.finalizer.list_user_bookings("user-2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_finalize_with_one_lapsed_hold() {
        let fx = fixture().await;
        let a = SessionId::parse("session_a").unwrap();

        fx.locks.lock_seats(&fx.bus_id, &seats(&["S2"]), &a).await.unwrap();
        fx.clock.advance(Duration::seconds(5));
        fx.locks.lock_seats(&fx.bus_id, &seats(&["S1"]), &a).await.unwrap();
        fx.clock.advance(Duration::seconds(176));

        let err = fx
            .finalizer
            .finalize("user-1", request(&fx.bus_id, &a, &["S1", "S2"]))
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::HoldExpired(ref s) if s == &seats(&["S2"])));

        assert!(fx.finalizer.list_user_bookings("user-1").await.unwrap().is_empty());
        let bus = fx.locks.seat_map(&fx.bus_id).await.unwrap();
        assert_eq!(bus.seat("S1").unwrap().locked_by.as_ref(), Some(&a));
        assert!(!bus.seat("S2").unwrap().is_booked);
    }

    #[tokio::test]
    async fn test_finalize_rejects_seats_held_by_other_session() {
        let fx = fixture().await;
        let a = SessionId::parse("session_a").unwrap();
        let b = SessionId::parse("session_b").unwrap();
        fx.locks.lock_seats(&fx.bus_id, &seats(&["S3"]), &b).await.unwrap();

        let err = fx
            .finalizer
            .finalize("user-1", request(&fx.bus_id, &a, &["S3"]))
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::HoldExpired(_)));
    }

    #[tokio::test]
    async fn test_invalid_payload_touches_nothing() {
        let fx = fixture().await;
        let a = SessionId::parse("session_a").unwrap();
        fx.locks.lock_seats(&fx.bus_id, &seats(&["S1"]), &a).await.unwrap();

        let mut req = request(&fx.bus_id, &a, &["S1"]);
        req.contact_phone = Masked::from("12345");
        let err = fx.finalizer.finalize("user-1", req).await.unwrap_err();
        assert!(matches!(err, BookingError::InvalidPassengerData(_)));

        let bus = fx.locks.seat_map(&fx.bus_id).await.unwrap();
        assert!(bus.seat("S1").unwrap().is_locked);
        assert!(!bus.seat("S1").unwrap().is_booked);
    }

    #[tokio::test]
    async fn test_cancel_frees_seats_once() {
        let fx = fixture().await;
        let a = SessionId::parse("session_a").unwrap();
        fx.locks.lock_seats(&fx.bus_id, &seats(&["S4"]), &a).await.unwrap();
        let booking = fx
            .finalizer
            .finalize("user-1", request(&fx.bus_id, &a, &["S4"]))
            .await
            .unwrap();

        assert!(matches!(
            fx.finalizer.cancel_booking(booking.id, "user-2").await,
            Err(BookingError::Forbidden)
        ));

        let (cancelled, freed) = fx.finalizer.cancel_booking(booking.id, "user-1").await.unwrap();
        assert_eq!(cancelled.status, BookingStatus::Cancelled);
        assert_eq!(freed, seats(&["S4"]));
        assert!(!fx.locks.seat_map(&fx.bus_id).await.unwrap().seat("S4").unwrap().is_booked);

        assert!(matches!(
            fx.finalizer.cancel_booking(booking.id, "user-1").await,
            Err(BookingError::AlreadyCancelled(_))
        ));
        assert!(matches!(
            fx.finalizer.cancel_booking(Uuid::new_v4(), "user-1").await,
            Err(BookingError::NotFound(_))
        ));
    }

    struct FailingRepository;

    #[async_trait]
    impl BookingRepository for FailingRepository {
        async fn save(&self, _booking: &Booking) -> BookingResult<()> {
            Err(BookingError::Repository("disk full".to_string()))
        }

        async fn get(&self, _id: Uuid) -> BookingResult<Option<Booking>> {
            Ok(None)
        }

        async fn list_for_user(&self, _user_id: &str) -> BookingResult<Vec<Booking>> {
            Ok(Vec::new())
        }

        async fn transition_status(&self, id: Uuid, _from: BookingStatus, _to: BookingStatus) -> BookingResult<bool> {
            Err(BookingError::NotFound(id))
        }

        async fn summary(&self, _recent: usize) -> BookingResult<BookingSummary> {
            Ok(BookingSummary::default())
        }
    }

    #[tokio::test]
    async fn test_persist_failure_restores_holds() {
        let fx = fixture_with(Arc::new(FailingRepository)).await;
        let a = SessionId::parse("session_a").unwrap();
        let grant = fx.locks.lock_seats(&fx.bus_id, &seats(&["S1"]), &a).await.unwrap();

        let err = fx
            .finalizer
            .finalize("user-1", request(&fx.bus_id, &a, &["S1"]))
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::Repository(_)));

        // The session keeps its hold with the original expiry and can retry.
        let bus = fx.locks.seat_map(&fx.bus_id).await.unwrap();
        let seat = bus.seat("S1").unwrap();
        assert!(!seat.is_booked);
        assert_eq!(seat.locked_by.as_ref(), Some(&a));
        assert_eq!(seat.lock_expires_at, Some(grant.expires_at));

        let b = SessionId::parse("session_b").unwrap();
        assert!(fx.locks.lock_seats(&fx.bus_id, &seats(&["S1"]), &b).await.is_err());
    }

    /// Pauses the first `get` after arming until the test opens the gate.
    struct GatedRepository {
        inner: InMemoryBookingRepository,
        armed: AtomicBool,
        reached: Notify,
        gate: Semaphore,
    }

    impl GatedRepository {
        fn new() -> Self {
            Self {
                inner: InMemoryBookingRepository::new(),
                armed: AtomicBool::new(false),
                reached: Notify::new(),
                gate: Semaphore::new(0),
            }
        }
    }

    #[async_trait]
    impl BookingRepository for GatedRepository {
        async fn save(&self, booking: &Booking) -> BookingResult<()> {
            self.inner.save(booking).await
        }

        async fn get(&self, id: Uuid) -> BookingResult<Option<Booking>> {
            let found = self.inner.get(id).await?;
            if self.armed.swap(false, Ordering::SeqCst) {
                self.reached.notify_one();
                let _permit = self
                    .gate
                    .acquire()
                    .await
                    .map_err(|e| BookingError::Repository(e.to_string()))?;
            }
            Ok(found)
        }

        async fn list_for_user(&self, user_id: &str) -> BookingResult<Vec<Booking>> {
            self.inner.list_for_user(user_id).await
        }

        async fn transition_status(&self, id: Uuid, from: BookingStatus, to: BookingStatus) -> BookingResult<bool> {
            self.inner.transition_status(id, from, to).await
        }

        async fn summary(&self, recent: usize) -> BookingResult<BookingSummary> {
            self.inner.summary(recent).await
        }
    }

    #[tokio::test]
    async fn test_racing_cancels_free_seats_once() {
        let repo = Arc::new(GatedRepository::new());
        let fx = fixture_with(repo.clone()).await;
        let a = SessionId::parse("session_a").unwrap();
        let b = SessionId::parse("session_b").unwrap();

        fx.locks.lock_seats(&fx.bus_id, &seats(&["S1"]), &a).await.unwrap();
        let booking = fx
            .finalizer
            .finalize("user-1", request(&fx.bus_id, &a, &["S1"]))
            .await
            .unwrap();

        // The slow cancel reads Confirmed, then stalls while the other one
        // completes and S1 is re-sold to another customer.
        repo.armed.store(true, Ordering::SeqCst);
        let (slow, resold) = tokio::join!(fx.finalizer.cancel_booking(booking.id, "user-1"), async {
            repo.reached.notified().await;
            let (_, freed) = fx.finalizer.cancel_booking(booking.id, "user-1").await.unwrap();
            assert_eq!(freed, seats(&["S1"]));

            fx.locks.lock_seats(&fx.bus_id, &seats(&["S1"]), &b).await.unwrap();
            let resold = fx
                .finalizer
                .finalize("user-2", request(&fx.bus_id, &b, &["S1"]))
                .await
                .unwrap();
            repo.gate.add_permits(1);
            resold
        });

        assert!(matches!(slow, Err(BookingError::AlreadyCancelled(id)) if id == booking.id));
        assert!(fx.locks.seat_map(&fx.bus_id).await.unwrap().seat("S1").unwrap().is_booked);
        let resold = fx.finalizer.get_booking(resold.id).await.unwrap();
        assert_eq!(resold.status, BookingStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_admin_stats_count_confirmed_revenue() {
        let fx = fixture().await;
        let a = SessionId::parse("session_a").unwrap();
        let b = SessionId::parse("session_b").unwrap();

        fx.locks.lock_seats(&fx.bus_id, &seats(&["S1", "S2"]), &a).await.unwrap();
        let kept = fx
            .finalizer
            .finalize("user-1", request(&fx.bus_id, &a, &["S1", "S2"]))
            .await
            .unwrap();
        fx.locks.lock_seats(&fx.bus_id, &seats(&["S3"]), &b).await.unwrap();
        let dropped = fx
            .finalizer
            .finalize("user-2", request(&fx.bus_id, &b, &["S3"]))
            .await
            .unwrap();
        fx.finalizer.cancel_booking(dropped.id, "user-2").await.unwrap();

        let stats = fx.finalizer.admin_stats().await.unwrap();
        assert_eq!(stats.total_buses, 1);
        assert_eq!(stats.total_bookings, 2);
        assert_eq!(stats.total_revenue, kept.total_amount);
        assert_eq!(stats.recent_bookings.len(), 2);
    }
}
