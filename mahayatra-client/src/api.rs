use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mahayatra_booking::{Booking, CreateBookingRequest};
use mahayatra_core::{Bus, BusId, SessionId};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

/// A granted hold as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatHold {
    pub locked_seats: Vec<String>,
    pub expires_at: DateTime<Utc>,
    pub hold_seconds: u64,
}

/// Server operations the session controller depends on.
#[async_trait]
pub trait SeatLockApi: Send + Sync {
    async fn fetch_bus(&self, bus_id: &BusId) -> ClientResult<Bus>;

    async fn lock_seats(&self, bus_id: &BusId, seats: &[String], session: &SessionId) -> ClientResult<SeatHold>;

    /// Returns the seats actually released.
    async fn unlock_seats(&self, bus_id: &BusId, seats: &[String], session: &SessionId) -> ClientResult<Vec<String>>;

    async fn create_booking(&self, request: &CreateBookingRequest) -> ClientResult<Booking>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SeatLockBody<'a> {
    seat_numbers: &'a [String],
    session_id: &'a str,
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UnlockBody {
    released_seats: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    unavailable_seats: Vec<String>,
    #[serde(default)]
    expired_seats: Vec<String>,
}

/// [`SeatLockApi`] over the HTTP API with a bearer token.
#[derive(Clone)]
pub struct HttpSeatLockApi {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpSeatLockApi {
    pub fn new(config: &ClientConfig, token: impl Into<String>) -> ClientResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send_json<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> ClientResult<Response> {
        self.client
            .post(self.url(path))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))
    }
}

async fn parse<T: DeserializeOwned>(response: Response) -> ClientResult<T> {
    if !response.status().is_success() {
        return Err(error_from(response).await);
    }
    response
        .json::<T>()
        .await
        .map_err(|e| ClientError::ResponseParse(e.to_string()))
}

async fn error_from(response: Response) -> ClientError {
    let status = response.status();
    let body: ErrorBody = match response.bytes().await {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
        Err(_) => ErrorBody::default(),
    };

    match status {
        StatusCode::CONFLICT if body.code.as_deref() == Some("HOLD_EXPIRED") => ClientError::HoldExpired(body.expired_seats),
        StatusCode::CONFLICT if !body.unavailable_seats.is_empty() => ClientError::SeatUnavailable(body.unavailable_seats),
        StatusCode::UNAUTHORIZED => ClientError::Unauthorized,
        status => ClientError::Api {
            status: status.as_u16(),
            message: body.message.unwrap_or_else(|| status.to_string()),
        },
    }
}

#[async_trait]
impl SeatLockApi for HttpSeatLockApi {
    async fn fetch_bus(&self, bus_id: &BusId) -> ClientResult<Bus> {
        let response = self
            .client
            .get(self.url(&format!("/buses/{}", bus_id)))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        parse::<Envelope<Bus>>(response).await.map(|e| e.data)
    }

    async fn lock_seats(&self, bus_id: &BusId, seats: &[String], session: &SessionId) -> ClientResult<SeatHold> {
        let body = SeatLockBody {
            seat_numbers: seats,
            session_id: session.as_str(),
        };
        let response = self.send_json(&format!("/buses/{}/lock-seats", bus_id), &body).await?;
        parse(response).await
    }

    async fn unlock_seats(&self, bus_id: &BusId, seats: &[String], session: &SessionId) -> ClientResult<Vec<String>> {
        let body = SeatLockBody {
            seat_numbers: seats,
            session_id: session.as_str(),
        };
        let response = self.send_json(&format!("/buses/{}/unlock-seats", bus_id), &body).await?;
        parse::<UnlockBody>(response).await.map(|b| b.released_seats)
    }

    async fn create_booking(&self, request: &CreateBookingRequest) -> ClientResult<Booking> {
        let response = self.send_json("/bookings/create", request).await?;
        parse::<Envelope<Booking>>(response).await.map(|e| e.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash() {
        let api = HttpSeatLockApi::new(&ClientConfig::new("http://localhost:5000/"), "token").unwrap();
        assert_eq!(api.url("/buses/b1"), "http://localhost:5000/buses/b1");
    }

    #[test]
    fn test_error_body_shapes() {
        let body: ErrorBody = serde_json::from_str(
            r#"{"success": false, "code": "HOLD_EXPIRED", "message": "expired", "expiredSeats": ["S2"]}"#,
        )
        .unwrap();
        assert_eq!(body.code.as_deref(), Some("HOLD_EXPIRED"));
        assert_eq!(body.expired_seats, vec!["S2"]);

        let body: ErrorBody =
            serde_json::from_str(r#"{"success": false, "message": "taken", "unavailableSeats": ["S1"]}"#).unwrap();
        assert_eq!(body.unavailable_seats, vec!["S1"]);
        assert!(body.code.is_none());
    }
}
