use mahayatra_booking::{BookingFinalizer, BookingRepository};
use mahayatra_core::LockManager;
use mahayatra_shared::SeatChangedEvent;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::metrics::Metrics;

/// Buffered seat events per subscriber before a slow SSE client starts lagging.
const EVENT_BUFFER: usize = 256;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
}

#[derive(Clone)]
pub struct AppState {
    pub locks: Arc<LockManager>,
    pub bookings: Arc<BookingFinalizer>,
    pub sse_tx: broadcast::Sender<SeatChangedEvent>,
    pub metrics: Arc<Metrics>,
    pub auth: AuthConfig,
}

impl AppState {
    pub fn new(
        locks: Arc<LockManager>,
        bookings: Arc<dyn BookingRepository>,
        auth: AuthConfig,
    ) -> Result<Self, prometheus::Error> {
        let (sse_tx, _) = broadcast::channel(EVENT_BUFFER);
        Ok(Self {
            bookings: Arc::new(BookingFinalizer::new(locks.clone(), bookings)),
            locks,
            sse_tx,
            metrics: Arc::new(Metrics::new()?),
            auth,
        })
    }

    /// Fans a seat change out to every open stream. Having no listeners is fine.
    pub fn publish(&self, event: SeatChangedEvent) {
        if self.sse_tx.send(event).is_err() {
            tracing::trace!("No seat stream subscribers");
        }
    }
}
