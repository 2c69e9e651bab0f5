use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use mahayatra_core::{Bus, BusId, BusSummary, LockError, NewBus, SessionId};
use mahayatra_shared::{SeatChange, SeatChangedEvent};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::info;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatLockRequest {
    pub seat_numbers: Vec<String>,
    pub session_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatLockResponse {
    pub success: bool,
    pub locked_seats: Vec<String>,
    pub expires_at: DateTime<Utc>,
    pub hold_seconds: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatUnlockResponse {
    pub success: bool,
    pub released_seats: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct BusResponse {
    pub success: bool,
    pub data: Bus,
}

#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub success: bool,
    pub data: Vec<T>,
}

impl<T> ListResponse<T> {
    fn ok(data: Vec<T>) -> Json<Self> {
        Json(Self { success: true, data })
    }
}

/// Blank `from`/`to` match every city.
#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    pub date: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct RouteQuery {
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
}

/// Browsing routes, open without a token.
pub fn catalog_routes() -> Router<AppState> {
    Router::new()
        .route("/buses/search", get(search_buses))
        .route("/buses/cities/list", get(list_cities))
        .route("/buses/available-dates", get(available_dates))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/buses/{bus_id}", get(get_bus))
        .route("/buses/{bus_id}/lock-seats", post(lock_seats))
        .route("/buses/{bus_id}/unlock-seats", post(unlock_seats))
        .route("/buses/{bus_id}/stream", get(seat_stream))
}

pub fn admin_routes() -> Router<AppState> {
    Router::new().route("/buses/add", post(add_bus))
}

fn parse_session(raw: &str) -> Result<SessionId, AppError> {
    SessionId::parse(raw).map_err(AppError::from)
}

async fn search_buses(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<ListResponse<BusSummary>>, AppError> {
    let buses = state.locks.search_buses(&query.from, &query.to, query.date).await?;
    Ok(ListResponse::ok(buses))
}

async fn list_cities(State(state): State<AppState>) -> Result<Json<ListResponse<String>>, AppError> {
    Ok(ListResponse::ok(state.locks.cities().await?))
}

async fn available_dates(
    State(state): State<AppState>,
    Query(query): Query<RouteQuery>,
) -> Result<Json<ListResponse<NaiveDate>>, AppError> {
    let dates = state.locks.available_dates(&query.from, &query.to).await?;
    Ok(ListResponse::ok(dates))
}

async fn add_bus(
    State(state): State<AppState>,
    Json(req): Json<NewBus>,
) -> Result<(StatusCode, Json<BusResponse>), AppError> {
    let bus = state.locks.register_bus(req).await?;
    Ok((StatusCode::CREATED, Json(BusResponse { success: true, data: bus })))
}

async fn get_bus(
    State(state): State<AppState>,
    Path(bus_id): Path<String>,
) -> Result<Json<BusResponse>, AppError> {
    let bus = state.locks.seat_map(&BusId::new(bus_id)).await?;
    Ok(Json(BusResponse { success: true, data: bus }))
}

async fn lock_seats(
    State(state): State<AppState>,
    Path(bus_id): Path<String>,
    Json(req): Json<SeatLockRequest>,
) -> Result<Json<SeatLockResponse>, AppError> {
    let bus_id = BusId::new(bus_id);
    let session = parse_session(&req.session_id)?;

    let grant = match state.locks.lock_seats(&bus_id, &req.seat_numbers, &session).await {
        Ok(grant) => grant,
        Err(e) => {
            if matches!(e, LockError::SeatUnavailable(_)) {
                state.metrics.lock_conflicts.inc();
            }
            return Err(e.into());
        }
    };
    state.metrics.lock_grants.inc();

    state.publish(
        SeatChangedEvent::new(bus_id.as_str(), grant.seats.clone(), SeatChange::Locked)
            .by_session(session.as_str())
            .expiring_at(grant.expires_at),
    );

    Ok(Json(SeatLockResponse {
        success: true,
        locked_seats: grant.seats,
        expires_at: grant.expires_at,
        hold_seconds: state.locks.policy().hold_duration().num_seconds() as u64,
    }))
}

async fn unlock_seats(
    State(state): State<AppState>,
    Path(bus_id): Path<String>,
    Json(req): Json<SeatLockRequest>,
) -> Result<Json<SeatUnlockResponse>, AppError> {
    let bus_id = BusId::new(bus_id);
    let session = parse_session(&req.session_id)?;

    let report = state.locks.unlock_seats(&bus_id, &req.seat_numbers, &session).await?;
    if !report.released.is_empty() {
        state.metrics.unlocks.inc_by(report.released.len() as u64);
        state.publish(
            SeatChangedEvent::new(bus_id.as_str(), report.released.clone(), SeatChange::Released)
                .by_session(session.as_str()),
        );
    }

    Ok(Json(SeatUnlockResponse {
        success: true,
        released_seats: report.released,
    }))
}

/// Live seat changes for one bus as server-sent events.
async fn seat_stream(
    State(state): State<AppState>,
    Path(bus_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let bus_id = BusId::new(bus_id);
    state.locks.seat_map(&bus_id).await?;
    info!("Seat stream opened for bus {}", bus_id);

    let stream = BroadcastStream::new(state.sse_tx.subscribe()).filter_map(move |result| match result {
        Ok(event) if event.bus_id == bus_id.as_str() => Event::default()
            .event(event.event_name())
            .json_data(&event)
            .ok()
            .map(Ok),
        Ok(_) => None,
        // Lagged subscribers skip ahead; the next seat map fetch resyncs them.
        Err(_) => None,
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
