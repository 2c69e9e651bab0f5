use std::collections::HashSet;

use crate::models::CreateBookingRequest;
use crate::{BookingError, BookingResult};

const MIN_AGE: u32 = 1;
const MAX_AGE: u32 = 120;
const PHONE_DIGITS: usize = 10;

/// Rejects a booking payload before any seat state is touched.
pub fn validate_request(request: &CreateBookingRequest) -> BookingResult<()> {
    if request.passengers.is_empty() {
        return Err(invalid("at least one passenger is required"));
    }

    let mut seats = HashSet::new();
    for passenger in &request.passengers {
        if passenger.name.trim().is_empty() {
            return Err(invalid("passenger name is required"));
        }
        if !(MIN_AGE..=MAX_AGE).contains(&passenger.age) {
            return Err(invalid(&format!("age must be between {} and {}", MIN_AGE, MAX_AGE)));
        }
        if !seats.insert(passenger.seat_number.trim()) {
            return Err(invalid(&format!("seat {} assigned twice", passenger.seat_number)));
        }
    }

    if !is_valid_email(request.contact_email.expose()) {
        return Err(invalid("contact email is not valid"));
    }
    if !is_valid_phone(request.contact_phone.expose()) {
        return Err(invalid("contact phone must be 10 digits"));
    }
    Ok(())
}

fn invalid(reason: &str) -> BookingError {
    BookingError::InvalidPassengerData(reason.to_string())
}

/// `local@domain.tld`: one `@`, no whitespace, a dot with text on both sides after the `@`.
fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    domain
        .char_indices()
        .any(|(i, c)| c == '.' && i > 0 && i + 1 < domain.len())
}

fn is_valid_phone(phone: &str) -> bool {
    phone.len() == PHONE_DIGITS && phone.bytes().all(|b| b.is_ascii_digit())
}
