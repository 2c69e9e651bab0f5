use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::bus::{Bus, BusId};
use crate::hold::{Hold, LockGrant, ReleaseReport};
use crate::session::SessionId;
use crate::store::{LockAttempt, SeatStore};
use crate::{LockError, LockResult};

/// Seat store kept in process memory.
///
/// Each bus sits behind its own mutex, so a request's checks and writes are
/// serialised against every other request on the same bus while unrelated
/// buses proceed in parallel. Lapsed holds are cleared whenever a bus is touched.
#[derive(Default)]
pub struct InMemorySeatStore {
    buses: RwLock<HashMap<BusId, Arc<Mutex<Bus>>>>,
}

impl InMemorySeatStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn entry(&self, bus_id: &BusId) -> LockResult<Arc<Mutex<Bus>>> {
        self.buses
            .read()
            .await
            .get(bus_id)
            .cloned()
            .ok_or_else(|| LockError::BusNotFound(bus_id.clone()))
    }
}

#[async_trait]
impl SeatStore for InMemorySeatStore {
    async fn insert_bus(&self, bus: Bus) -> LockResult<()> {
        let mut buses = self.buses.write().await;
        if buses.contains_key(&bus.id) {
            return Err(LockError::DuplicateBus(bus.id));
        }
        buses.insert(bus.id.clone(), Arc::new(Mutex::new(bus)));
        Ok(())
    }

    async fn load_bus(&self, bus_id: &BusId, now: DateTime<Utc>) -> LockResult<Option<Bus>> {
        let entry = match self.entry(bus_id).await {
            Ok(entry) => entry,
            Err(LockError::BusNotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let mut bus = entry.lock().await;
        bus.expire_holds(now);
        Ok(Some(bus.clone()))
    }

    async fn list_buses(&self, now: DateTime<Utc>) -> LockResult<Vec<Bus>> {
        let entries: Vec<_> = self.buses.read().await.values().cloned().collect();
        let mut buses = Vec::with_capacity(entries.len());
        for entry in entries {
            let mut bus = entry.lock().await;
            bus.expire_holds(now);
            buses.push(bus.clone());
        }
        buses.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(buses)
    }

    async fn try_lock(&self, attempt: LockAttempt<'_>) -> LockResult<LockGrant> {
        let entry = self.entry(attempt.bus_id).await?;
        let mut bus = entry.lock().await;
        bus.expire_holds(attempt.now);

        let unknown = bus.unknown_seats(attempt.seats);
        if !unknown.is_empty() {
            return Err(LockError::UnknownSeats(unknown));
        }

        let unavailable: Vec<String> = attempt
            .seats
            .iter()
            .filter(|s| {
                bus.seat(s)
                    .map_or(true, |seat| !seat.is_available_to(attempt.session, attempt.now))
            })
            .cloned()
            .collect();
        if !unavailable.is_empty() {
            return Err(LockError::SeatUnavailable(unavailable));
        }

        let kept = bus
            .held_by(attempt.session, attempt.now)
            .into_iter()
            .filter(|s| !attempt.seats.contains(s))
            .count();
        if kept + attempt.seats.len() > attempt.max_held {
            return Err(LockError::SeatLimitExceeded { limit: attempt.max_held });
        }

        for number in attempt.seats {
            if let Some(seat) = bus.seat_mut(number) {
                seat.lock(attempt.session.clone(), attempt.expires_at);
            }
        }

        Ok(LockGrant {
            bus_id: attempt.bus_id.clone(),
            session_id: attempt.session.clone(),
            seats: attempt.seats.to_vec(),
            expires_at: attempt.expires_at,
        })
    }

    async fn release(
        &self,
        bus_id: &BusId,
        seats: &[String],
        session: &SessionId,
        now: DateTime<Utc>,
    ) -> LockResult<ReleaseReport> {
        let entry = self.entry(bus_id).await?;
        let mut bus = entry.lock().await;
        bus.expire_holds(now);

        let mut report = ReleaseReport::default();
        for number in seats {
            match bus.seat_mut(number) {
                Some(seat) if seat.is_held_by(session, now) => {
                    seat.clear_lock();
                    report.released.push(number.clone());
                }
                _ => report.skipped.push(number.clone()),
            }
        }
        Ok(report)
    }

    async fn commit_holds(
        &self,
        bus_id: &BusId,
        seats: &[String],
        session: &SessionId,
        now: DateTime<Utc>,
    ) -> LockResult<Vec<Hold>> {
        let entry = self.entry(bus_id).await?;
        let mut bus = entry.lock().await;
        bus.expire_holds(now);

        let unknown = bus.unknown_seats(seats);
        if !unknown.is_empty() {
            return Err(LockError::UnknownSeats(unknown));
        }

        let lapsed: Vec<String> = seats
            .iter()
            .filter(|s| bus.seat(s).map_or(true, |seat| !seat.is_held_by(session, now)))
            .cloned()
            .collect();
        if !lapsed.is_empty() {
            return Err(LockError::HoldExpired(lapsed));
        }

        let mut consumed = Vec::with_capacity(seats.len());
        for number in seats {
            if let Some(seat) = bus.seat_mut(number) {
                if let Some(expires_at) = seat.lock_expires_at {
                    consumed.push(Hold {
                        bus_id: bus_id.clone(),
                        seat_number: number.clone(),
                        session_id: session.clone(),
                        expires_at,
                    });
                }
                seat.book();
            }
        }
        Ok(consumed)
    }

    async fn reinstate_holds(&self, bus_id: &BusId, holds: &[Hold], now: DateTime<Utc>) -> LockResult<Vec<String>> {
        let entry = self.entry(bus_id).await?;
        let mut bus = entry.lock().await;

        let mut held = Vec::new();
        for hold in holds {
            let Some(seat) = bus.seat_mut(&hold.seat_number) else {
                continue;
            };
            if !seat.is_booked {
                continue;
            }
            seat.free();
            if hold.expires_at > now {
                seat.lock(hold.session_id.clone(), hold.expires_at);
                held.push(hold.seat_number.clone());
            }
        }
        Ok(held)
    }

    async fn free_seats(&self, bus_id: &BusId, seats: &[String]) -> LockResult<Vec<String>> {
        let entry = self.entry(bus_id).await?;
        let mut bus = entry.lock().await;

        let mut freed = Vec::new();
        for number in seats {
            if let Some(seat) = bus.seat_mut(number) {
                if seat.is_booked {
                    seat.free();
                    freed.push(number.clone());
                }
            }
        }
        Ok(freed)
    }
}
