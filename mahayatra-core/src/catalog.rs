use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::bus::{Bus, BusId};

/// Journeys can be searched and booked this many days ahead of today.
pub const BOOKING_WINDOW_DAYS: i64 = 30;

/// Rolling range of bookable journey dates, both ends inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl BookingWindow {
    pub fn starting(today: NaiveDate) -> Self {
        Self {
            start: today,
            end: today + Duration::days(BOOKING_WINDOW_DAYS),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

/// Search listing entry: the bus without its seat table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusSummary {
    pub id: BusId,
    pub bus_name: String,
    pub bus_type: String,
    pub from: String,
    pub to: String,
    pub departure_time: String,
    pub arrival_time: String,
    pub journey_date: NaiveDate,
    pub price: u32,
    pub total_seats: u32,
    /// Neither booked nor held at the time of the search.
    pub available_seats: u32,
}

impl BusSummary {
    pub fn of(bus: &Bus, now: DateTime<Utc>) -> Self {
        Self {
            id: bus.id.clone(),
            bus_name: bus.bus_name.clone(),
            bus_type: bus.bus_type.clone(),
            from: bus.from.clone(),
            to: bus.to.clone(),
            departure_time: bus.departure_time.clone(),
            arrival_time: bus.arrival_time.clone(),
            journey_date: bus.journey_date,
            price: bus.price,
            total_seats: bus.total_seats,
            available_seats: bus.available_count(now) as u32,
        }
    }
}

/// Case-insensitive city match. A blank filter matches every city.
fn matches_city(filter: &str, city: &str) -> bool {
    let filter = filter.trim();
    filter.is_empty() || filter.eq_ignore_ascii_case(city.trim())
}

fn on_route(bus: &Bus, from: &str, to: &str) -> bool {
    matches_city(from, &bus.from) && matches_city(to, &bus.to)
}

/// Buses on the route for `date`, earliest departure first.
pub fn search(buses: &[Bus], from: &str, to: &str, date: NaiveDate, now: DateTime<Utc>) -> Vec<BusSummary> {
    let mut found: Vec<BusSummary> = buses
        .iter()
        .filter(|bus| bus.journey_date == date && on_route(bus, from, to))
        .map(|bus| BusSummary::of(bus, now))
        .collect();
    found.sort_by(|a, b| a.departure_time.cmp(&b.departure_time).then_with(|| a.id.cmp(&b.id)));
    found
}

/// Every origin and destination served, sorted and de-duplicated.
pub fn cities(buses: &[Bus]) -> Vec<String> {
    buses
        .iter()
        .flat_map(|bus| [bus.from.trim(), bus.to.trim()])
        .filter(|city| !city.is_empty())
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Journey dates inside `window` with at least one bus on the route.
pub fn available_dates(buses: &[Bus], from: &str, to: &str, window: BookingWindow) -> Vec<NaiveDate> {
    buses
        .iter()
        .filter(|bus| window.contains(bus.journey_date) && on_route(bus, from, to))
        .map(|bus| bus.journey_date)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
