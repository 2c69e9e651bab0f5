use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::bus::BusId;
use crate::session::SessionId;

/// One seat reserved for one session until `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Hold {
    pub bus_id: BusId,
    pub seat_number: String,
    pub session_id: SessionId,
    pub expires_at: DateTime<Utc>,
}

/// Result of a successful lock request. All seats share one expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockGrant {
    pub bus_id: BusId,
    pub session_id: SessionId,
    pub seats: Vec<String>,
    pub expires_at: DateTime<Utc>,
}

impl LockGrant {
    pub fn holds(&self) -> impl Iterator<Item = Hold> + '_ {
        self.seats.iter().map(move |seat_number| Hold {
            bus_id: self.bus_id.clone(),
            seat_number: seat_number.clone(),
            session_id: self.session_id.clone(),
            expires_at: self.expires_at,
        })
    }
}

/// Outcome of a best-effort unlock.
///
/// `skipped` lists requested seats the caller did not hold (someone else's
/// lock, expired, booked or unknown). They are reported, never treated as errors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseReport {
    pub released: Vec<String>,
    pub skipped: Vec<String>,
}
