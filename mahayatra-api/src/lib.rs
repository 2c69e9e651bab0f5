use axum::{http::Method, routing::get, Json, Router};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod bookings;
pub mod buses;
pub mod error;
pub mod metrics;
pub mod middleware;
pub mod state;

pub use state::{AppState, AuthConfig};

use crate::middleware::{admin_auth_middleware, customer_auth_middleware};

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::USER_AGENT,
        ]);

    let customer = Router::new()
        .merge(buses::routes())
        .merge(bookings::routes())
        .route_layer(axum::middleware::from_fn_with_state(state.clone(), customer_auth_middleware));

    let admin = Router::new()
        .merge(buses::admin_routes())
        .merge(bookings::admin_routes())
        .route_layer(axum::middleware::from_fn_with_state(state.clone(), admin_auth_middleware));

    Router::new()
        .merge(buses::catalog_routes())
        .merge(customer)
        .merge(admin)
        .merge(metrics::routes())
        .route("/health", get(health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
