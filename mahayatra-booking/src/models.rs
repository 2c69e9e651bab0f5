use chrono::{DateTime, NaiveDate, Utc};
use mahayatra_core::{Bus, BusId, SessionId};
use mahayatra_shared::Masked;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pnr::generate_pnr;
use crate::{BookingError, BookingResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BookingStatus {
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Confirmed => "Confirmed",
            BookingStatus::Cancelled => "Cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "Confirmed" => Some(BookingStatus::Confirmed),
            "Cancelled" => Some(BookingStatus::Cancelled),
            _ => None,
        }
    }
}

/// Settled by the external payment gateway; bookings start out pending.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PaymentStatus {
    Pending,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Gender {
    Male,
    Female,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Passenger {
    pub name: String,
    pub age: u32,
    pub gender: Gender,
    pub seat_number: String,
}

/// What the client submits once passenger details are filled in.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookingRequest {
    pub bus_id: BusId,
    pub session_id: SessionId,
    pub passengers: Vec<Passenger>,
    pub contact_email: Masked<String>,
    pub contact_phone: Masked<String>,
}

impl CreateBookingRequest {
    pub fn seat_numbers(&self) -> Vec<String> {
        self.passengers.iter().map(|p| p.seat_number.clone()).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: Uuid,
    pub pnr: String,
    pub bus_id: BusId,
    pub session_id: SessionId,
    pub user_id: String,
    pub passengers: Vec<Passenger>,
    pub contact_email: Masked<String>,
    pub contact_phone: Masked<String>,
    pub total_seats: u32,
    /// Whole rupees.
    pub total_amount: u64,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub booking_date: DateTime<Utc>,
    pub journey_date: NaiveDate,
}

/// Aggregate figures over every stored booking.
#[derive(Debug, Clone, Default)]
pub struct BookingSummary {
    pub total_bookings: u64,
    /// Sum over confirmed bookings only, whole rupees.
    pub total_revenue: u64,
    /// Newest first.
    pub recent_bookings: Vec<Booking>,
}

/// Operator dashboard figures.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminStats {
    pub total_buses: u64,
    pub total_bookings: u64,
    pub total_revenue: u64,
    pub recent_bookings: Vec<Booking>,
}

impl Booking {
    /// A confirmed booking for seats whose holds have just been committed.
    pub fn confirmed(user_id: &str, bus: &Bus, request: CreateBookingRequest) -> Self {
        let total_seats = request.passengers.len() as u32;
        Self {
            id: Uuid::new_v4(),
            pnr: generate_pnr(),
            bus_id: bus.id.clone(),
            session_id: request.session_id,
            user_id: user_id.to_string(),
            passengers: request.passengers,
            contact_email: request.contact_email,
            contact_phone: request.contact_phone,
            total_seats,
            total_amount: u64::from(total_seats) * u64::from(bus.price),
            status: BookingStatus::Confirmed,
            payment_status: PaymentStatus::Pending,
            booking_date: Utc::now(),
            journey_date: bus.journey_date,
        }
    }

    pub fn seat_numbers(&self) -> Vec<String> {
        self.passengers.iter().map(|p| p.seat_number.clone()).collect()
    }

    /// Transition: Confirmed → Cancelled
    pub fn cancel(&mut self) -> BookingResult<()> {
        if self.status == BookingStatus::Cancelled {
            return Err(BookingError::AlreadyCancelled(self.id));
        }
        self.status = BookingStatus::Cancelled;
        Ok(())
    }
}
