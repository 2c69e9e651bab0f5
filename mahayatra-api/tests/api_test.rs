use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::{Duration, NaiveDate};
use mahayatra_api::middleware::auth::{issue_token, ROLE_ADMIN, ROLE_CUSTOMER};
use mahayatra_api::{app, AppState, AuthConfig};
use mahayatra_booking::InMemoryBookingRepository;
use mahayatra_core::{Clock, HoldPolicy, InMemorySeatStore, LockManager, ManualClock};
use mahayatra_shared::SeatChange;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

const SECRET: &str = "test-secret";

struct TestApp {
    router: Router,
    state: AppState,
    clock: Arc<ManualClock>,
    admin: String,
    alice: String,
    bob: String,
}

impl TestApp {
    fn new() -> Self {
        let clock = Arc::new(ManualClock::default());
        let locks = Arc::new(LockManager::new(
            Arc::new(InMemorySeatStore::new()),
            clock.clone(),
            HoldPolicy::default(),
        ));
        let state = AppState::new(
            locks,
            Arc::new(InMemoryBookingRepository::new()),
            AuthConfig {
                secret: SECRET.to_string(),
            },
        )
        .unwrap();

        Self {
            router: app(state.clone()),
            state,
            clock,
            admin: issue_token(SECRET, "admin-1", ROLE_ADMIN, 3600).unwrap(),
            alice: issue_token(SECRET, "alice", ROLE_CUSTOMER, 3600).unwrap(),
            bob: issue_token(SECRET, "bob", ROLE_CUSTOMER, 3600).unwrap(),
        }
    }

    async fn send(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn add_bus(&self, id: &str, seats: u32) {
        let date = NaiveDate::from_ymd_opt(2026, 11, 2).unwrap();
        self.add_bus_on(id, ("Pune", "Mumbai"), date, "08:30", seats).await;
    }

    async fn add_bus_on(&self, id: &str, (from, to): (&str, &str), date: NaiveDate, departs: &str, seats: u32) {
        let (status, _) = self
            .send(
                Method::POST,
                "/buses/add",
                Some(&self.admin),
                Some(json!({
                    "id": id,
                    "busName": "Shivneri Express",
                    "busType": "AC Seater",
                    "from": from,
                    "to": to,
                    "departureTime": departs,
                    "arrivalTime": "12:00",
                    "journeyDate": date,
                    "price": 650,
                    "totalSeats": seats
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    fn today(&self) -> NaiveDate {
        self.clock.now().date_naive()
    }

    async fn lock(&self, token: &str, bus: &str, session: &str, seats: &[&str]) -> (StatusCode, Value) {
        self.send(
            Method::POST,
            &format!("/buses/{}/lock-seats", bus),
            Some(token),
            Some(json!({ "seatNumbers": seats, "sessionId": session })),
        )
        .await
    }

    async fn seat(&self, bus: &str, seat: &str) -> Value {
        let (status, body) = self
            .send(Method::GET, &format!("/buses/{}", bus), Some(&self.alice), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        body["data"]["seats"]
            .as_array()
            .unwrap()
            .iter()
            .find(|s| s["seatNumber"] == seat)
            .cloned()
            .unwrap()
    }
}

fn booking_body(bus: &str, session: &str, seats: &[&str]) -> Value {
    let passengers: Vec<Value> = seats
        .iter()
        .map(|s| json!({ "name": format!("Passenger {}", s), "age": 34, "gender": "Female", "seatNumber": s }))
        .collect();
    json!({
        "busId": bus,
        "sessionId": session,
        "passengers": passengers,
        "contactEmail": "priya@example.in",
        "contactPhone": "9876543210"
    })
}

#[tokio::test]
async fn test_health_is_public() {
    let app = TestApp::new();
    let (status, body) = app.send(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_routes_require_bearer_token() {
    let app = TestApp::new();
    app.add_bus("bus-1", 4).await;

    let (status, _) = app.send(Method::GET, "/buses/bus-1", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app.send(Method::GET, "/buses/bus-1", Some("not-a-jwt"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .send(Method::POST, "/buses/add", Some(&app.alice), Some(json!({})))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_lock_conflict_is_all_or_nothing() {
    let app = TestApp::new();
    app.add_bus("bus-1", 10).await;

    let (status, body) = app.lock(&app.alice, "bus-1", "session_a", &["S1", "S2"]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["lockedSeats"], json!(["S1", "S2"]));
    assert_eq!(body["holdSeconds"], 180);

    let (status, body) = app.lock(&app.bob, "bus-1", "session_b", &["S2", "S3"]).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);
    assert_eq!(body["unavailableSeats"], json!(["S2"]));

    let s3 = app.seat("bus-1", "S3").await;
    assert_eq!(s3["isLocked"], false);
    let s2 = app.seat("bus-1", "S2").await;
    assert_eq!(s2["lockedBy"], "session_a");
}

#[tokio::test]
async fn test_unlock_only_releases_own_holds() {
    let app = TestApp::new();
    app.add_bus("bus-1", 4).await;
    app.lock(&app.alice, "bus-1", "session_a", &["S1"]).await;

    let (status, body) = app
        .send(
            Method::POST,
            "/buses/bus-1/unlock-seats",
            Some(&app.bob),
            Some(json!({ "seatNumbers": ["S1"], "sessionId": "session_b" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["releasedSeats"], json!([]));
    assert_eq!(app.seat("bus-1", "S1").await["isLocked"], true);

    let (status, body) = app
        .send(
            Method::POST,
            "/buses/bus-1/unlock-seats",
            Some(&app.alice),
            Some(json!({ "seatNumbers": ["S1"], "sessionId": "session_a" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["releasedSeats"], json!(["S1"]));

    let (status, _) = app.lock(&app.bob, "bus-1", "session_b", &["S1"]).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_expired_hold_reads_as_available() {
    let app = TestApp::new();
    app.add_bus("bus-1", 4).await;
    app.lock(&app.alice, "bus-1", "session_a", &["S1"]).await;

    app.clock.advance(Duration::seconds(180));
    let s1 = app.seat("bus-1", "S1").await;
    assert_eq!(s1["isLocked"], false);
    assert!(s1["lockedBy"].is_null());

    let (status, _) = app.lock(&app.bob, "bus-1", "session_b", &["S1"]).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_lock_rejects_bad_requests() {
    let app = TestApp::new();
    app.add_bus("bus-1", 10).await;

    let (status, _) = app.lock(&app.alice, "bus-9", "session_a", &["S1"]).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app.lock(&app.alice, "bus-1", "session_a", &["S99"]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app.lock(&app.alice, "bus-1", "session a", &["S1"]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .lock(&app.alice, "bus-1", "session_a", &["S1", "S2", "S3", "S4", "S5", "S6", "S7"])
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_booking_with_lapsed_hold_is_rejected() {
    let app = TestApp::new();
    app.add_bus("bus-1", 10).await;

    app.lock(&app.alice, "bus-1", "session_a", &["S2"]).await;
    app.clock.advance(Duration::seconds(5));
    app.lock(&app.alice, "bus-1", "session_a", &["S1"]).await;
    app.clock.advance(Duration::seconds(176));

    let (status, body) = app
        .send(
            Method::POST,
            "/bookings/create",
            Some(&app.alice),
            Some(booking_body("bus-1", "session_a", &["S1", "S2"])),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "HOLD_EXPIRED");
    assert_eq!(body["expiredSeats"], json!(["S2"]));

    let (_, listed) = app.send(Method::GET, "/bookings/user/alice", Some(&app.alice), None).await;
    assert_eq!(listed["data"], json!([]));
    assert_eq!(app.seat("bus-1", "S1").await["lockedBy"], "session_a");
}

#[tokio::test]
async fn test_booking_lifecycle() {
    let app = TestApp::new();
    app.add_bus("bus-1", 10).await;
    let mut events = app.state.sse_tx.subscribe();

    app.lock(&app.alice, "bus-1", "session_a", &["S4", "S5"]).await;
    let locked = events.try_recv().unwrap();
    assert_eq!(locked.change, SeatChange::Locked);
    assert_eq!(locked.seat_numbers, vec!["S4", "S5"]);

    let (status, body) = app
        .send(
            Method::POST,
            "/bookings/create",
            Some(&app.alice),
            Some(booking_body("bus-1", "session_a", &["S4", "S5"])),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let booking = &body["data"];
    assert_eq!(booking["status"], "Confirmed");
    assert_eq!(booking["userId"], "alice");
    assert_eq!(booking["totalAmount"], 1300);
    assert!(booking["pnr"].as_str().unwrap().starts_with("MY"));
    assert_eq!(events.try_recv().unwrap().change, SeatChange::Booked);

    let s4 = app.seat("bus-1", "S4").await;
    assert_eq!(s4["isBooked"], true);
    assert_eq!(s4["isLocked"], false);

    let id = booking["id"].as_str().unwrap().to_string();
    let (status, _) = app.send(Method::GET, &format!("/bookings/{}", id), Some(&app.alice), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app.send(Method::GET, &format!("/bookings/{}", id), Some(&app.bob), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, listed) = app.send(Method::GET, "/bookings/user/alice", Some(&app.alice), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["data"].as_array().unwrap().len(), 1);
    let (status, _) = app.send(Method::GET, "/bookings/user/alice", Some(&app.bob), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .send(Method::PUT, &format!("/bookings/cancel/{}", id), Some(&app.bob), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, body) = app
        .send(Method::PUT, &format!("/bookings/cancel/{}", id), Some(&app.alice), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "Cancelled");
    let freed = events.try_recv().unwrap();
    assert_eq!(freed.change, SeatChange::Freed);
    assert_eq!(freed.seat_numbers, vec!["S4", "S5"]);
    assert_eq!(app.seat("bus-1", "S4").await["isBooked"], false);

    let (status, _) = app
        .send(Method::PUT, &format!("/bookings/cancel/{}", id), Some(&app.alice), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_search_lists_route_within_window() {
    let app = TestApp::new();
    let day = app.today() + Duration::days(2);
    app.add_bus_on("late", ("Pune", "Nashik"), day, "22:00", 4).await;
    app.add_bus_on("early", ("Pune", "Nashik"), day, "06:00", 4).await;
    app.add_bus_on("other", ("Nagpur", "Nashik"), day, "07:00", 4).await;
    app.add_bus_on("far", ("Pune", "Nashik"), app.today() + Duration::days(45), "07:00", 4).await;
    app.lock(&app.alice, "late", "session_a", &["S1"]).await;

    // No token needed to browse.
    let uri = format!("/buses/search?from=pune&to=NASHIK&date={}", day);
    let (status, body) = app.send(Method::GET, &uri, None, None).await;
    assert_eq!(status, StatusCode::OK);
    let found = body["data"].as_array().unwrap();
    let ids: Vec<_> = found.iter().map(|b| b["id"].as_str().unwrap()).collect();
    assert_eq!(ids, vec!["early", "late"]);
    assert_eq!(found[1]["availableSeats"], 3);
    assert!(found[0].get("seats").is_none());

    let (_, body) = app.send(Method::GET, &format!("/buses/search?date={}", day), None, None).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 3);

    let past = app.today() - Duration::days(1);
    let (status, body) = app
        .send(Method::GET, &format!("/buses/search?from=Pune&to=Nashik&date={}", past), None, None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let far = app.today() + Duration::days(31);
    let (status, _) = app
        .send(Method::GET, &format!("/buses/search?from=Pune&to=Nashik&date={}", far), None, None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_cities_and_available_dates() {
    let app = TestApp::new();
    let soon = app.today() + Duration::days(5);
    app.add_bus_on("b1", ("Pune", "Nashik"), soon, "08:00", 4).await;
    app.add_bus_on("b2", ("Pune", "Nashik"), app.today(), "08:00", 4).await;
    app.add_bus_on("b3", ("Pune", "Nashik"), app.today() + Duration::days(45), "08:00", 4).await;
    app.add_bus_on("b4", ("Nagpur", "Pune"), soon, "08:00", 4).await;

    let (status, body) = app.send(Method::GET, "/buses/cities/list", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!(["Nagpur", "Nashik", "Pune"]));

    let (status, body) = app
        .send(Method::GET, "/buses/available-dates?from=Pune&to=Nashik", None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!([app.today(), soon]));
}

#[tokio::test]
async fn test_admin_stats() {
    let app = TestApp::new();
    app.add_bus("bus-1", 10).await;
    app.add_bus("bus-2", 10).await;

    app.lock(&app.alice, "bus-1", "session_a", &["S1", "S2"]).await;
    app.send(
        Method::POST,
        "/bookings/create",
        Some(&app.alice),
        Some(booking_body("bus-1", "session_a", &["S1", "S2"])),
    )
    .await;
    app.lock(&app.bob, "bus-1", "session_b", &["S3"]).await;
    let (_, created) = app
        .send(
            Method::POST,
            "/bookings/create",
            Some(&app.bob),
            Some(booking_body("bus-1", "session_b", &["S3"])),
        )
        .await;
    let cancelled = created["data"]["id"].as_str().unwrap().to_string();
    app.send(Method::PUT, &format!("/bookings/cancel/{}", cancelled), Some(&app.bob), None)
        .await;

    let (status, _) = app.send(Method::GET, "/bookings/admin/stats", Some(&app.alice), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app.send(Method::GET, "/bookings/admin/stats", Some(&app.admin), None).await;
    assert_eq!(status, StatusCode::OK);
    let stats = &body["data"];
    assert_eq!(stats["totalBuses"], 2);
    assert_eq!(stats["totalBookings"], 2);
    assert_eq!(stats["totalRevenue"], 1300);
    assert_eq!(stats["recentBookings"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_invalid_passenger_data() {
    let app = TestApp::new();
    app.add_bus("bus-1", 4).await;
    app.lock(&app.alice, "bus-1", "session_a", &["S1"]).await;

    let mut body = booking_body("bus-1", "session_a", &["S1"]);
    body["contactEmail"] = json!("not-an-email");
    let (status, body) = app
        .send(Method::POST, "/bookings/create", Some(&app.alice), Some(body))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(app.seat("bus-1", "S1").await["isBooked"], false);
}

#[tokio::test]
async fn test_metrics_count_grants_and_conflicts() {
    let app = TestApp::new();
    app.add_bus("bus-1", 4).await;
    app.lock(&app.alice, "bus-1", "session_a", &["S1"]).await;
    app.lock(&app.bob, "bus-1", "session_b", &["S1"]).await;

    let text = app.state.metrics.export().unwrap();
    assert!(text.contains("seat_lock_grants_total 1"));
    assert!(text.contains("seat_lock_conflicts_total 1"));

    let (status, _) = app.send(Method::GET, "/metrics", None, None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_stream_unknown_bus_is_not_found() {
    let app = TestApp::new();
    let (status, _) = app.send(Method::GET, "/buses/nope/stream", Some(&app.alice), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
