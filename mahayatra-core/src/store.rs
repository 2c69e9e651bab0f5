use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::bus::{Bus, BusId};
use crate::hold::{Hold, LockGrant, ReleaseReport};
use crate::session::SessionId;
use crate::LockResult;

/// A lock request as the store sees it: already normalised, with timestamps fixed.
#[derive(Debug, Clone, Copy)]
pub struct LockAttempt<'a> {
    pub bus_id: &'a BusId,
    pub seats: &'a [String],
    pub session: &'a SessionId,
    pub now: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Upper bound on seats one session may hold on this bus after the grant.
    pub max_held: usize,
}

/// Persistence port for seat state.
///
/// Every method that changes seats must evaluate its checks and writes as one
/// atomic unit per bus, and must treat a hold whose expiry is `<= now` as absent.
#[async_trait]
pub trait SeatStore: Send + Sync {
    async fn insert_bus(&self, bus: Bus) -> LockResult<()>;

    /// The bus with lapsed holds already cleared from the view.
    async fn load_bus(&self, bus_id: &BusId, now: DateTime<Utc>) -> LockResult<Option<Bus>>;

    /// All-or-nothing check-and-set over `attempt.seats`.
    async fn try_lock(&self, attempt: LockAttempt<'_>) -> LockResult<LockGrant>;

    /// Clears holds owned by `session`; everything else is left untouched.
    async fn release(
        &self,
        bus_id: &BusId,
        seats: &[String],
        session: &SessionId,
        now: DateTime<Utc>,
    ) -> LockResult<ReleaseReport>;

    /// Every registered bus, projected at `now`.
    async fn list_buses(&self, now: DateTime<Utc>) -> LockResult<Vec<Bus>>;

    /// Turns the session's holds into booked seats, or fails with `HoldExpired` changing nothing.
    /// Returns the holds that were consumed, with their original expiry.
    async fn commit_holds(
        &self,
        bus_id: &BusId,
        seats: &[String],
        session: &SessionId,
        now: DateTime<Utc>,
    ) -> LockResult<Vec<Hold>>;

    /// Undoes `commit_holds`: each booked seat goes back to its hold, or to
    /// available when that hold has lapsed by `now`. Returns the seats re-held.
    async fn reinstate_holds(&self, bus_id: &BusId, holds: &[Hold], now: DateTime<Utc>) -> LockResult<Vec<String>>;

    /// Returns booked seats to available. Used by cancellation.
    async fn free_seats(&self, bus_id: &BusId, seats: &[String]) -> LockResult<Vec<String>>;
}
