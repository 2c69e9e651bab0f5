use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use mahayatra_booking::BookingError;
use mahayatra_core::LockError;
use serde_json::json;

#[derive(Debug)]
pub enum AppError {
    AuthenticationError(String),
    AuthorizationError(String),
    ValidationError(String),
    NotFoundError(String),
    ConflictError(String),
    /// Seats booked or held by another session; the whole request was refused.
    SeatUnavailableError(Vec<String>),
    /// Holds lapsed before the booking could be finalized.
    HoldExpiredError(Vec<String>),
    InternalServerError(String),
    Anyhow(anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::AuthenticationError(msg) => (StatusCode::UNAUTHORIZED, message(msg)),
            AppError::AuthorizationError(msg) => (StatusCode::FORBIDDEN, message(msg)),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, message(msg)),
            AppError::NotFoundError(msg) => (StatusCode::NOT_FOUND, message(msg)),
            AppError::ConflictError(msg) => (StatusCode::CONFLICT, message(msg)),
            AppError::SeatUnavailableError(seats) => (
                StatusCode::CONFLICT,
                json!({
                    "success": false,
                    "message": format!("Seats no longer available: {}", seats.join(", ")),
                    "unavailableSeats": seats,
                }),
            ),
            AppError::HoldExpiredError(seats) => (
                StatusCode::CONFLICT,
                json!({
                    "success": false,
                    "code": "HOLD_EXPIRED",
                    "message": "Your seat selection expired. Please select your seats again.",
                    "expiredSeats": seats,
                }),
            ),
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, message("Internal Server Error".to_string()))
            }
            AppError::Anyhow(err) => {
                tracing::error!("Internal Server Error: {}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, message("Internal Server Error".to_string()))
            }
        };

        (status, Json(body)).into_response()
    }
}

fn message(msg: String) -> serde_json::Value {
    json!({
        "success": false,
        "message": msg,
    })
}

impl From<LockError> for AppError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::SeatUnavailable(seats) => AppError::SeatUnavailableError(seats),
            LockError::HoldExpired(seats) => AppError::HoldExpiredError(seats),
            LockError::BusNotFound(_) => AppError::NotFoundError(err.to_string()),
            LockError::DuplicateBus(_) => AppError::ConflictError(err.to_string()),
            LockError::EmptyRequest
            | LockError::InvalidSession(_)
            | LockError::InvalidBus(_)
            | LockError::UnknownSeats(_)
            | LockError::SeatLimitExceeded { .. }
            | LockError::OutsideBookingWindow { .. } => AppError::ValidationError(err.to_string()),
            LockError::Store(msg) => AppError::InternalServerError(msg),
        }
    }
}

impl From<BookingError> for AppError {
    fn from(err: BookingError) -> Self {
        match err {
            BookingError::InvalidPassengerData(_) => AppError::ValidationError(err.to_string()),
            BookingError::HoldExpired(seats) => AppError::HoldExpiredError(seats),
            BookingError::NotFound(_) => AppError::NotFoundError(err.to_string()),
            BookingError::Forbidden => AppError::AuthorizationError(err.to_string()),
            BookingError::AlreadyCancelled(_) => AppError::ConflictError(err.to_string()),
            BookingError::Lock(lock) => lock.into(),
            BookingError::Repository(msg) => AppError::InternalServerError(msg),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Anyhow(err)
    }
}
