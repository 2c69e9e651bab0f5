pub mod bus;
pub mod catalog;
pub mod clock;
pub mod hold;
pub mod lock;
pub mod memory;
pub mod session;
pub mod store;

pub use bus::{Bus, BusId, NewBus, Seat};
pub use catalog::{BookingWindow, BusSummary};
pub use clock::{Clock, ManualClock, SystemClock};
pub use hold::{Hold, LockGrant, ReleaseReport};
pub use lock::{HoldPolicy, LockManager, MAX_HOLD_SECONDS};
pub use memory::InMemorySeatStore;
pub use session::SessionId;
pub use store::{LockAttempt, SeatStore};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LockError {
    #[error("No seats requested")]
    EmptyRequest,
    #[error("Invalid session id: {0}")]
    InvalidSession(String),
    #[error("Invalid bus definition: {0}")]
    InvalidBus(String),
    #[error("Bus not found: {0}")]
    BusNotFound(BusId),
    #[error("Bus already registered: {0}")]
    DuplicateBus(BusId),
    #[error("Seats not on this bus: {}", .0.join(", "))]
    UnknownSeats(Vec<String>),
    #[error("Seats unavailable: {}", .0.join(", "))]
    SeatUnavailable(Vec<String>),
    #[error("Seat limit exceeded: at most {limit} seats per session")]
    SeatLimitExceeded { limit: usize },
    #[error("Hold expired for seats: {}", .0.join(", "))]
    HoldExpired(Vec<String>),
    #[error("Bookings are only available from {start} to {end}, not {date}")]
    OutsideBookingWindow {
        date: chrono::NaiveDate,
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
    },
    #[error("Seat store failure: {0}")]
    Store(String),
}

pub type LockResult<T> = Result<T, LockError>;
