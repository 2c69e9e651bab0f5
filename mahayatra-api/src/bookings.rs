use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Extension, Json, Router,
};
use mahayatra_booking::{AdminStats, Booking, BookingError, CreateBookingRequest};
use mahayatra_shared::{SeatChange, SeatChangedEvent};
use serde::Serialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::auth::{Claims, ROLE_ADMIN};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct BookingResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> BookingResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self { success: true, data })
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/bookings/create", post(create_booking))
        .route("/bookings/{id}", get(get_booking))
        .route("/bookings/user/{user_id}", get(list_user_bookings))
        .route("/bookings/cancel/{id}", put(cancel_booking))
}

pub fn admin_routes() -> Router<AppState> {
    Router::new().route("/bookings/admin/stats", get(admin_stats))
}

async fn create_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<BookingResponse<Booking>>), AppError> {
    let booking = match state.bookings.finalize(&claims.sub, req).await {
        Ok(booking) => booking,
        Err(e) => {
            if matches!(e, BookingError::HoldExpired(_)) {
                state.metrics.hold_expired.inc();
            }
            return Err(e.into());
        }
    };
    state.metrics.bookings_created.inc();

    state.publish(
        SeatChangedEvent::new(booking.bus_id.as_str(), booking.seat_numbers(), SeatChange::Booked)
            .by_session(booking.session_id.as_str()),
    );

    Ok((StatusCode::CREATED, BookingResponse::ok(booking)))
}

async fn get_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<Json<BookingResponse<Booking>>, AppError> {
    let booking = state.bookings.get_booking(id).await?;
    if booking.user_id != claims.sub && claims.role != ROLE_ADMIN {
        // Other users' bookings are indistinguishable from missing ones.
        return Err(BookingError::NotFound(id).into());
    }
    Ok(BookingResponse::ok(booking))
}

async fn list_user_bookings(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(user_id): Path<String>,
) -> Result<Json<BookingResponse<Vec<Booking>>>, AppError> {
    if user_id != claims.sub && claims.role != ROLE_ADMIN {
        return Err(AppError::AuthorizationError("Cannot list another user's bookings".to_string()));
    }
    let bookings = state.bookings.list_user_bookings(&user_id).await?;
    Ok(BookingResponse::ok(bookings))
}

async fn cancel_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<Json<BookingResponse<Booking>>, AppError> {
    let (booking, freed) = state.bookings.cancel_booking(id, &claims.sub).await?;

    if !freed.is_empty() {
        state.publish(SeatChangedEvent::new(booking.bus_id.as_str(), freed, SeatChange::Freed));
    }

    Ok(BookingResponse::ok(booking))
}

async fn admin_stats(State(state): State<AppState>) -> Result<Json<BookingResponse<AdminStats>>, AppError> {
    Ok(BookingResponse::ok(state.bookings.admin_stats().await?))
}
