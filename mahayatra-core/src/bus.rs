use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

use crate::session::SessionId;
use crate::{LockError, LockResult};

/// Identifies one bus on one journey date.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BusId(String);

impl BusId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BusId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BusId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Booking and hold state of one seat.
///
/// The lock fields are only meaningful while `is_locked` is set; every
/// transition out of the locked state clears all three together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Seat {
    pub seat_number: String,
    pub is_booked: bool,
    pub is_locked: bool,
    pub locked_by: Option<SessionId>,
    pub lock_expires_at: Option<DateTime<Utc>>,
}

impl Seat {
    pub fn available(seat_number: impl Into<String>) -> Self {
        Self {
            seat_number: seat_number.into(),
            is_booked: false,
            is_locked: false,
            locked_by: None,
            lock_expires_at: None,
        }
    }

    /// Session holding a lock that is still valid at `now`.
    pub fn holder_at(&self, now: DateTime<Utc>) -> Option<&SessionId> {
        match (&self.locked_by, self.lock_expires_at) {
            (Some(session), Some(expires_at)) if self.is_locked && expires_at > now => Some(session),
            _ => None,
        }
    }

    pub fn is_held_by(&self, session: &SessionId, now: DateTime<Utc>) -> bool {
        !self.is_booked && self.holder_at(now) == Some(session)
    }

    /// Free, or already held by `session`.
    pub fn is_available_to(&self, session: &SessionId, now: DateTime<Utc>) -> bool {
        !self.is_booked && self.holder_at(now).map_or(true, |holder| holder == session)
    }

    pub fn lock(&mut self, session: SessionId, expires_at: DateTime<Utc>) {
        self.is_locked = true;
        self.locked_by = Some(session);
        self.lock_expires_at = Some(expires_at);
    }

    pub fn clear_lock(&mut self) {
        self.is_locked = false;
        self.locked_by = None;
        self.lock_expires_at = None;
    }

    /// Clears a lock whose expiry has passed. Returns true when something was cleared.
    pub fn expire(&mut self, now: DateTime<Utc>) -> bool {
        let stale = (self.is_locked || self.locked_by.is_some()) && self.holder_at(now).is_none();
        if stale {
            self.clear_lock();
        }
        stale
    }

    pub fn book(&mut self) {
        self.is_booked = true;
        self.clear_lock();
    }

    pub fn free(&mut self) {
        self.is_booked = false;
        self.clear_lock();
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bus {
    #[serde(alias = "_id")]
    pub id: BusId,
    pub bus_name: String,
    pub bus_type: String,
    pub from: String,
    pub to: String,
    pub departure_time: String,
    pub arrival_time: String,
    pub journey_date: NaiveDate,
    /// Fare per seat in whole rupees.
    pub price: u32,
    pub total_seats: u32,
    pub seats: Vec<Seat>,
}

impl Bus {
    pub fn seat(&self, seat_number: &str) -> Option<&Seat> {
        self.seats.iter().find(|s| s.seat_number == seat_number)
    }

    pub fn seat_mut(&mut self, seat_number: &str) -> Option<&mut Seat> {
        self.seats.iter_mut().find(|s| s.seat_number == seat_number)
    }

    /// Clears every hold that has lapsed at `now`, returning the affected seat numbers.
    pub fn expire_holds(&mut self, now: DateTime<Utc>) -> Vec<String> {
        self.seats
            .iter_mut()
            .filter_map(|seat| seat.expire(now).then(|| seat.seat_number.clone()))
            .collect()
    }

    /// The bus as any reader at `now` must see it.
    pub fn projected(mut self, now: DateTime<Utc>) -> Self {
        self.expire_holds(now);
        self
    }

    pub fn held_by(&self, session: &SessionId, now: DateTime<Utc>) -> Vec<String> {
        self.seats
            .iter()
            .filter(|s| s.is_held_by(session, now))
            .map(|s| s.seat_number.clone())
            .collect()
    }

    pub fn available_count(&self, now: DateTime<Utc>) -> usize {
        self.seats
            .iter()
            .filter(|s| !s.is_booked && s.holder_at(now).is_none())
            .count()
    }

    /// Requested seats that are not part of this bus.
    pub fn unknown_seats(&self, requested: &[String]) -> Vec<String> {
        requested
            .iter()
            .filter(|s| self.seat(s).is_none())
            .cloned()
            .collect()
    }
}

/// Payload for registering a bus. Seats default to `S1..S{total_seats}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBus {
    #[serde(default)]
    pub id: Option<BusId>,
    pub bus_name: String,
    pub bus_type: String,
    pub from: String,
    pub to: String,
    pub departure_time: String,
    pub arrival_time: String,
    pub journey_date: NaiveDate,
    pub price: u32,
    pub total_seats: u32,
    #[serde(default)]
    pub seat_numbers: Option<Vec<String>>,
}

impl NewBus {
    pub fn into_bus(self) -> LockResult<Bus> {
        if self.bus_name.trim().is_empty() {
            return Err(LockError::InvalidBus("busName is required".to_string()));
        }
        if self.total_seats == 0 {
            return Err(LockError::InvalidBus("totalSeats must be positive".to_string()));
        }

        let seat_numbers = match self.seat_numbers {
            Some(numbers) => {
                if numbers.len() != self.total_seats as usize {
                    return Err(LockError::InvalidBus(format!(
                        "{} seat numbers given for {} seats",
                        numbers.len(),
                        self.total_seats
                    )));
                }
                let mut seen = HashSet::new();
                for number in &numbers {
                    if number.trim().is_empty() || !seen.insert(number.as_str()) {
                        return Err(LockError::InvalidBus(format!("bad seat number '{}'", number)));
                    }
                }
                numbers
            }
            None => (1..=self.total_seats).map(|i| format!("S{}", i)).collect(),
        };

        Ok(Bus {
            id: self.id.unwrap_or_else(BusId::generate),
            bus_name: self.bus_name,
            bus_type: self.bus_type,
            from: self.from,
            to: self.to,
            departure_time: self.departure_time,
            arrival_time: self.arrival_time,
            journey_date: self.journey_date,
            price: self.price,
            total_seats: self.total_seats,
            seats: seat_numbers.into_iter().map(Seat::available).collect(),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Duration;

    pub(crate) fn sample_new_bus(id: &str, seats: u32) -> NewBus {
        NewBus {
            id: Some(BusId::from(id)),
            bus_name: "Shivneri Express".to_string(),
            bus_type: "AC Sleeper".to_string(),
            from: "Pune".to_string(),
            to: "Mumbai".to_string(),
            departure_time: "08:30".to_string(),
            arrival_time: "12:00".to_string(),
            journey_date: NaiveDate::from_ymd_opt(2026, 11, 2).unwrap(),
            price: 650,
            total_seats: seats,
            seat_numbers: None,
        }
    }

    #[test]
    fn test_generated_seat_numbers() {
        let bus = sample_new_bus("bus-1", 3).into_bus().unwrap();
        let numbers: Vec<_> = bus.seats.iter().map(|s| s.seat_number.as_str()).collect();
        assert_eq!(numbers, vec!["S1", "S2", "S3"]);
        assert!(bus.seats.iter().all(|s| !s.is_booked && !s.is_locked));
    }

    #[test]
    fn test_rejects_inconsistent_layout() {
        let mut new_bus = sample_new_bus("bus-1", 2);
        new_bus.seat_numbers = Some(vec!["A1".to_string(), "A1".to_string()]);
        assert!(matches!(new_bus.into_bus(), Err(LockError::InvalidBus(_))));

        let mut new_bus = sample_new_bus("bus-1", 3);
        new_bus.seat_numbers = Some(vec!["A1".to_string()]);
        assert!(matches!(new_bus.into_bus(), Err(LockError::InvalidBus(_))));

        assert!(sample_new_bus("bus-1", 0).into_bus().is_err());
    }

    #[test]
    fn test_lock_fields_clear_together_on_expiry() {
        let now = Utc::now();
        let session = SessionId::parse("session_a").unwrap();
        let mut seat = Seat::available("S1");

        seat.lock(session.clone(), now + Duration::seconds(180));
        assert_eq!(seat.holder_at(now), Some(&session));
        assert!(!seat.expire(now));

        let later = now + Duration::seconds(180);
        assert_eq!(seat.holder_at(later), None);
        assert!(seat.expire(later));
        assert_eq!(seat, Seat::available("S1"));
    }

    #[test]
    fn test_booking_clears_lock() {
        let now = Utc::now();
        let session = SessionId::parse("session_a").unwrap();
        let mut seat = Seat::available("S1");
        seat.lock(session.clone(), now + Duration::seconds(60));

        seat.book();
        assert!(seat.is_booked);
        assert!(!seat.is_locked);
        assert!(seat.locked_by.is_none());
        assert!(!seat.is_available_to(&session, now));
    }

    #[test]
    fn test_bus_wire_format_accepts_mongo_id() {
        let json = serde_json::json!({
            "_id": "665f1c",
            "busName": "Volvo 9600",
            "busType": "AC Seater",
            "from": "Nagpur",
            "to": "Pune",
            "departureTime": "21:00",
            "arrivalTime": "09:00",
            "journeyDate": "2026-11-02",
            "price": 1200,
            "totalSeats": 1,
            "seats": [{
                "seatNumber": "S1",
                "isBooked": false,
                "isLocked": true,
                "lockedBy": "session_1_abc",
                "lockExpiresAt": "2026-11-02T08:00:00Z"
            }]
        });

        let bus: Bus = serde_json::from_value(json).unwrap();
        assert_eq!(bus.id.as_str(), "665f1c");
        assert_eq!(bus.seats[0].locked_by.as_ref().unwrap().as_str(), "session_1_abc");
    }
}
