pub mod finalizer;
pub mod models;
pub mod pnr;
pub mod repository;
pub mod validation;

pub use finalizer::BookingFinalizer;
pub use models::{
    AdminStats, Booking, BookingStatus, BookingSummary, CreateBookingRequest, Gender, Passenger, PaymentStatus,
};
pub use repository::{BookingRepository, InMemoryBookingRepository};

use mahayatra_core::LockError;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("Invalid passenger data: {0}")]
    InvalidPassengerData(String),

    #[error("Your seat selection expired: {}", .0.join(", "))]
    HoldExpired(Vec<String>),

    #[error("Booking not found: {0}")]
    NotFound(Uuid),

    #[error("Booking belongs to another user")]
    Forbidden,

    #[error("Booking already cancelled: {0}")]
    AlreadyCancelled(Uuid),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("Booking repository failure: {0}")]
    Repository(String),
}

pub type BookingResult<T> = Result<T, BookingError>;
