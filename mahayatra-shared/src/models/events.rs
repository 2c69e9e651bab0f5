use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What happened to a group of seats on one bus.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeatChange {
    Locked,
    Released,
    Booked,
    Freed,
}

/// Broadcast to seat-map subscribers whenever seat state moves.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SeatChangedEvent {
    pub bus_id: String,
    pub seat_numbers: Vec<String>,
    pub change: SeatChange,
    /// Session that caused the change, absent for cancellations.
    pub session_id: Option<String>,
    pub lock_expires_at: Option<DateTime<Utc>>,
    pub at: DateTime<Utc>,
}

impl SeatChangedEvent {
    pub fn new(bus_id: impl Into<String>, seat_numbers: Vec<String>, change: SeatChange) -> Self {
        Self {
            bus_id: bus_id.into(),
            seat_numbers,
            change,
            session_id: None,
            lock_expires_at: None,
            at: Utc::now(),
        }
    }

    pub fn by_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn expiring_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.lock_expires_at = Some(expires_at);
        self
    }

    /// SSE event name for this change.
    pub fn event_name(&self) -> &'static str {
        match self.change {
            SeatChange::Locked => "seat_locked",
            SeatChange::Released => "seat_released",
            SeatChange::Booked => "seat_booked",
            SeatChange::Freed => "seat_freed",
        }
    }
}
