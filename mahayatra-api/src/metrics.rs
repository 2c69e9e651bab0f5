use axum::{extract::State, http::header, response::IntoResponse, routing::get, Router};
use prometheus::{Encoder, IntCounter, Registry, TextEncoder};

use crate::error::AppError;
use crate::state::AppState;

/// Seat and booking counters, scraped from `GET /metrics`.
pub struct Metrics {
    registry: Registry,
    pub lock_grants: IntCounter,
    pub lock_conflicts: IntCounter,
    pub unlocks: IntCounter,
    pub bookings_created: IntCounter,
    pub hold_expired: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let lock_grants = IntCounter::new("seat_lock_grants_total", "Lock requests granted in full")?;
        let lock_conflicts = IntCounter::new(
            "seat_lock_conflicts_total",
            "Lock requests rejected because a seat was booked or held elsewhere",
        )?;
        let unlocks = IntCounter::new("seat_unlocks_total", "Seats released through unlock requests")?;
        let bookings_created = IntCounter::new("bookings_created_total", "Bookings confirmed")?;
        let hold_expired = IntCounter::new(
            "booking_hold_expired_total",
            "Booking attempts rejected because a hold had lapsed",
        )?;

        registry.register(Box::new(lock_grants.clone()))?;
        registry.register(Box::new(lock_conflicts.clone()))?;
        registry.register(Box::new(unlocks.clone()))?;
        registry.register(Box::new(bookings_created.clone()))?;
        registry.register(Box::new(hold_expired.clone()))?;

        Ok(Self {
            registry,
            lock_grants,
            lock_conflicts,
            unlocks,
            bookings_created,
            hold_expired,
        })
    }

    pub fn export(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/metrics", get(export_metrics))
}

async fn export_metrics(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let body = state
        .metrics
        .export()
        .map_err(|e| AppError::InternalServerError(e.to_string()))?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body))
}
