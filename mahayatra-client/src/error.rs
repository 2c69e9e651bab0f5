use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("Seats no longer available: {}", .0.join(", "))]
    SeatUnavailable(Vec<String>),

    #[error("Your seat selection expired: {}", .0.join(", "))]
    HoldExpired(Vec<String>),

    #[error("You can select at most {limit} seats")]
    SeatLimitReached { limit: usize },

    /// Booked or held by someone else according to the last seat map.
    #[error("Seat {0} cannot be selected")]
    SeatNotSelectable(String),

    #[error("Select at least one seat first")]
    NoSeatsSelected,

    #[error("Not allowed while {0}")]
    InvalidStep(&'static str),

    #[error("Not signed in or token rejected")]
    Unauthorized,

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Request failed: {0}")]
    Transport(String),

    #[error("Response parsing failed: {0}")]
    ResponseParse(String),
}

pub type ClientResult<T> = Result<T, ClientError>;
