use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BookingStatus {
    Pending,
    Countered,
    Accepted,
    Active,
    Completed,
    Cancelled,
}

impl BookingStatus {
    /// A booking in one of these states may still be claimed by a driver.
    pub fn is_open(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Countered)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Completed | BookingStatus::Cancelled)
    }
}

/// A passenger trip request. `agreed_fare` is set exactly when the status is
/// Accepted, Active, or Completed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub passenger: String,
    pub pickup: Coordinate,
    pub destination: Coordinate,
    pub preferred_fare: Decimal,
    pub agreed_fare: Option<Decimal>,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
}

/// A driver-proposed fare awaiting passenger confirmation. Submitted to the
/// registry and discarded; never stored locally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterOffer {
    pub booking_id: Uuid,
    pub proposed_fare: Decimal,
    pub message: Option<String>,
}

/// A candidate booking as shown to the driver, with the pickup distance from
/// the driver's last known position. `awaiting_passenger` marks a booking
/// this driver has countered and is still waiting on.
#[derive(Debug, Clone, Serialize)]
pub struct NearbyBooking {
    pub booking: Booking,
    pub pickup_distance_m: f64,
    pub awaiting_passenger: bool,
}
