use chrono::{Duration, NaiveDate};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::bus::{Bus, BusId, NewBus};
use crate::catalog::{self, BookingWindow, BusSummary};
use crate::clock::{Clock, SystemClock};
use crate::hold::{Hold, LockGrant, ReleaseReport};
use crate::session::SessionId;
use crate::store::{LockAttempt, SeatStore};
use crate::{LockError, LockResult};

pub const DEFAULT_HOLD_SECONDS: u64 = 180;
pub const DEFAULT_MAX_SEATS_PER_SESSION: usize = 6;
/// Longest hold any policy may grant.
pub const MAX_HOLD_SECONDS: u64 = 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HoldPolicy {
    pub hold_seconds: u64,
    pub max_seats_per_session: usize,
}

impl HoldPolicy {
    /// Hold length, capped at [`MAX_HOLD_SECONDS`].
    pub fn hold_duration(&self) -> Duration {
        Duration::seconds(self.hold_seconds.min(MAX_HOLD_SECONDS) as i64)
    }
}

impl Default for HoldPolicy {
    fn default() -> Self {
        Self {
            hold_seconds: DEFAULT_HOLD_SECONDS,
            max_seats_per_session: DEFAULT_MAX_SEATS_PER_SESSION,
        }
    }
}

/// Grants and releases session-scoped, time-bounded seat holds.
///
/// Mutual exclusion is delegated to the [`SeatStore`], which evaluates each
/// request atomically per bus. The manager normalises requests, stamps them
/// with the clock, and decides the expiry.
pub struct LockManager {
    store: Arc<dyn SeatStore>,
    clock: Arc<dyn Clock>,
    policy: HoldPolicy,
}

impl LockManager {
    pub fn new(store: Arc<dyn SeatStore>, clock: Arc<dyn Clock>, policy: HoldPolicy) -> Self {
        Self { store, clock, policy }
    }

    pub fn with_system_clock(store: Arc<dyn SeatStore>, policy: HoldPolicy) -> Self {
        Self::new(store, Arc::new(SystemClock), policy)
    }

    pub fn policy(&self) -> HoldPolicy {
        self.policy
    }

    pub async fn register_bus(&self, new_bus: NewBus) -> LockResult<Bus> {
        let bus = new_bus.into_bus()?;
        self.store.insert_bus(bus.clone()).await?;
        info!("Bus registered: {} ({} seats)", bus.id, bus.total_seats);
        Ok(bus)
    }

    /// Current seat map; holds past their expiry read as available.
    pub async fn seat_map(&self, bus_id: &BusId) -> LockResult<Bus> {
        self.store
            .load_bus(bus_id, self.clock.now())
            .await?
            .ok_or_else(|| LockError::BusNotFound(bus_id.clone()))
    }

    /// Locks every requested seat for `session`, or none of them.
    ///
    /// Seats already held by the same session are re-granted with the new expiry.
    pub async fn lock_seats(
        &self,
        bus_id: &BusId,
        seat_numbers: &[String],
        session: &SessionId,
    ) -> LockResult<LockGrant> {
        let seats = normalize(seat_numbers);
        if seats.is_empty() {
            return Err(LockError::EmptyRequest);
        }

        let now = self.clock.now();
        let attempt = LockAttempt {
            bus_id,
            seats: &seats,
            session,
            now,
            expires_at: now + self.policy.hold_duration(),
            max_held: self.policy.max_seats_per_session,
        };

        match self.store.try_lock(attempt).await {
            Ok(grant) => {
                info!(
                    "Seats locked on bus {} for {}: {:?} until {}",
                    bus_id, session, grant.seats, grant.expires_at
                );
                Ok(grant)
            }
            Err(LockError::SeatUnavailable(taken)) => {
                warn!("Lock conflict on bus {} for {}: {:?}", bus_id, session, taken);
                Err(LockError::SeatUnavailable(taken))
            }
            Err(e) => Err(e),
        }
    }

    /// Best-effort release. Seats the caller does not hold are skipped, not rejected.
    pub async fn unlock_seats(
        &self,
        bus_id: &BusId,
        seat_numbers: &[String],
        session: &SessionId,
    ) -> LockResult<ReleaseReport> {
        let seats = normalize(seat_numbers);
        if seats.is_empty() {
            return Ok(ReleaseReport::default());
        }

        let report = self.store.release(bus_id, &seats, session, self.clock.now()).await?;
        if !report.released.is_empty() {
            info!("Seats released on bus {} by {}: {:?}", bus_id, session, report.released);
        }
        if !report.skipped.is_empty() {
            debug!("Unlock skipped seats not held by {}: {:?}", session, report.skipped);
        }
        Ok(report)
    }

    /// Re-validates that `session` still holds every seat and books them in one step.
    ///
    /// Returns the consumed holds so the caller can hand them back with
    /// [`reinstate_holds`](Self::reinstate_holds) if the booking cannot be recorded.
    pub async fn confirm_holds(
        &self,
        bus_id: &BusId,
        seat_numbers: &[String],
        session: &SessionId,
    ) -> LockResult<Vec<Hold>> {
        let seats = normalize(seat_numbers);
        if seats.is_empty() {
            return Err(LockError::EmptyRequest);
        }

        self.store
            .commit_holds(bus_id, &seats, session, self.clock.now())
            .await
            .map_err(|e| {
                if let LockError::HoldExpired(lapsed) = &e {
                    warn!("Holds lapsed on bus {} for {}: {:?}", bus_id, session, lapsed);
                }
                e
            })
    }

    /// Turns seats booked by [`confirm_holds`](Self::confirm_holds) back into
    /// the same holds. Holds that lapsed meanwhile come back as available seats.
    pub async fn reinstate_holds(&self, bus_id: &BusId, holds: &[Hold]) -> LockResult<Vec<String>> {
        let held = self.store.reinstate_holds(bus_id, holds, self.clock.now()).await?;
        info!(
            "Holds reinstated on bus {}: {:?} of {} seats",
            bus_id,
            held,
            holds.len()
        );
        Ok(held)
    }

    /// Returns booked seats to the pool (cancellation path).
    pub async fn free_seats(&self, bus_id: &BusId, seat_numbers: &[String]) -> LockResult<Vec<String>> {
        let freed = self.store.free_seats(bus_id, &normalize(seat_numbers)).await?;
        info!("Seats freed on bus {}: {:?}", bus_id, freed);
        Ok(freed)
    }
}

impl LockManager {
    /// Dates customers may currently search and book.
    pub fn booking_window(&self) -> BookingWindow {
        BookingWindow::starting(self.clock.now().date_naive())
    }

    pub async fn search_buses(&self, from: &str, to: &str, date: NaiveDate) -> LockResult<Vec<BusSummary>> {
        let window = self.booking_window();
        if !window.contains(date) {
            return Err(LockError::OutsideBookingWindow {
                date,
                start: window.start,
                end: window.end,
            });
        }
        let now = self.clock.now();
        let buses = self.store.list_buses(now).await?;
        let found = catalog::search(&buses, from, to, date, now);
        debug!("Search {} -> {} on {}: {} buses", from, to, date, found.len());
        Ok(found)
    }

    pub async fn cities(&self) -> LockResult<Vec<String>> {
        let buses = self.store.list_buses(self.clock.now()).await?;
        Ok(catalog::cities(&buses))
    }

    pub async fn available_dates(&self, from: &str, to: &str) -> LockResult<Vec<NaiveDate>> {
        let buses = self.store.list_buses(self.clock.now()).await?;
        Ok(catalog::available_dates(&buses, from, to, self.booking_window()))
    }

    pub async fn bus_count(&self) -> LockResult<usize> {
        Ok(self.store.list_buses(self.clock.now()).await?.len())
    }
}

/// Trims, drops blanks and de-duplicates while keeping request order.
fn normalize(seat_numbers: &[String]) -> Vec<String> {
    let mut seats: Vec<String> = Vec::with_capacity(seat_numbers.len());
    for raw in seat_numbers {
        let seat = raw.trim();
        if !seat.is_empty() && !seats.iter().any(|s| s == seat) {
            seats.push(seat.to_string());
        }
    }
    seats
}
