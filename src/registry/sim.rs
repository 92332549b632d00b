use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::geo::haversine_m;
use crate::models::booking::{Booking, BookingStatus, Coordinate};
use crate::registry::{BookingRegistry, BookingResponse, RegistryError};

/// In-memory registry with the same verdict semantics as the real server:
/// first accept wins, completion is radius-gated, counters await the
/// passenger. Backs the daemon's `sim` mode and the test suite, which also
/// drives the passenger side through the non-trait helpers.
pub struct SimRegistry {
    records: DashMap<Uuid, SimRecord>,
    completion_radius_m: f64,
    list_calls: AtomicUsize,
    respond_calls: AtomicUsize,
}

struct SimRecord {
    booking: Booking,
    claimed_by: Option<Uuid>,
    pending_counter: Option<PendingCounter>,
}

struct PendingCounter {
    driver_id: Uuid,
    fare: Decimal,
}

impl SimRegistry {
    pub fn new(completion_radius_m: f64) -> Self {
        Self {
            records: DashMap::new(),
            completion_radius_m,
            list_calls: AtomicUsize::new(0),
            respond_calls: AtomicUsize::new(0),
        }
    }

    /// Passenger side: post a new trip request.
    pub fn post_booking(
        &self,
        passenger: &str,
        pickup: Coordinate,
        destination: Coordinate,
        preferred_fare: Decimal,
    ) -> Booking {
        let booking = Booking {
            id: Uuid::new_v4(),
            passenger: passenger.to_string(),
            pickup,
            destination,
            preferred_fare,
            agreed_fare: None,
            status: BookingStatus::Pending,
            created_at: Utc::now(),
        };

        self.records.insert(
            booking.id,
            SimRecord {
                booking: booking.clone(),
                claimed_by: None,
                pending_counter: None,
            },
        );
        booking
    }

    /// Passenger side: accept the driver's counter offer. The countering
    /// driver claims the booking at the countered fare.
    pub fn passenger_accept_counter(&self, booking_id: Uuid) -> Result<Booking, RegistryError> {
        let mut record = self
            .records
            .get_mut(&booking_id)
            .ok_or(RegistryError::NotFound)?;

        let counter = record
            .pending_counter
            .take()
            .ok_or_else(|| RegistryError::Invalid("no counter offer pending".to_string()))?;

        record.booking.status = BookingStatus::Accepted;
        record.booking.agreed_fare = Some(counter.fare);
        record.claimed_by = Some(counter.driver_id);
        Ok(record.booking.clone())
    }

    /// Passenger side: reject the counter. The booking re-enters the pool,
    /// or is withdrawn entirely.
    pub fn passenger_decline_counter(
        &self,
        booking_id: Uuid,
        withdraw: bool,
    ) -> Result<Booking, RegistryError> {
        let mut record = self
            .records
            .get_mut(&booking_id)
            .ok_or(RegistryError::NotFound)?;

        record.pending_counter = None;
        record.booking.status = if withdraw {
            BookingStatus::Cancelled
        } else {
            BookingStatus::Pending
        };
        record.booking.agreed_fare = None;
        Ok(record.booking.clone())
    }

    pub fn booking(&self, booking_id: Uuid) -> Option<Booking> {
        self.records.get(&booking_id).map(|r| r.booking.clone())
    }

    /// Number of `list_nearby` calls served so far.
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::Relaxed)
    }

    /// Number of `respond` calls served so far.
    pub fn respond_calls(&self) -> usize {
        self.respond_calls.load(Ordering::Relaxed)
    }

    /// Drop a record outright, as if the server expired the booking.
    pub fn forget(&self, booking_id: Uuid) {
        self.records.remove(&booking_id);
    }
}

impl BookingRegistry for SimRegistry {
    async fn list_nearby(
        &self,
        center: Coordinate,
        radius_km: f64,
    ) -> Result<Vec<Booking>, RegistryError> {
        self.list_calls.fetch_add(1, Ordering::Relaxed);

        let mut nearby: Vec<Booking> = self
            .records
            .iter()
            .filter(|record| record.booking.status.is_open())
            .filter(|record| haversine_m(&center, &record.booking.pickup) <= radius_km * 1_000.0)
            .map(|record| record.booking.clone())
            .collect();

        nearby.sort_by_key(|booking| booking.created_at);
        Ok(nearby)
    }

    async fn respond(
        &self,
        driver_id: Uuid,
        booking_id: Uuid,
        response: BookingResponse,
    ) -> Result<Booking, RegistryError> {
        self.respond_calls.fetch_add(1, Ordering::Relaxed);

        let mut record = self
            .records
            .get_mut(&booking_id)
            .ok_or(RegistryError::NotFound)?;

        if record.claimed_by.is_some() || !record.booking.status.is_open() {
            return Err(RegistryError::AlreadyClaimed);
        }

        if response.accept {
            record.booking.status = BookingStatus::Accepted;
            record.booking.agreed_fare = Some(record.booking.preferred_fare);
            record.claimed_by = Some(driver_id);
            record.pending_counter = None;
        } else {
            let fare = response
                .counter_offer
                .ok_or_else(|| RegistryError::Invalid("counter offer required".to_string()))?;
            if fare <= Decimal::ZERO {
                return Err(RegistryError::Invalid(
                    "counter fare must be positive".to_string(),
                ));
            }

            record.booking.status = BookingStatus::Countered;
            record.pending_counter = Some(PendingCounter { driver_id, fare });
        }

        Ok(record.booking.clone())
    }

    async fn complete(
        &self,
        driver_id: Uuid,
        booking_id: Uuid,
        position: Coordinate,
    ) -> Result<Booking, RegistryError> {
        let mut record = self
            .records
            .get_mut(&booking_id)
            .ok_or(RegistryError::NotFound)?;

        let in_progress = matches!(
            record.booking.status,
            BookingStatus::Accepted | BookingStatus::Active
        );
        if !in_progress || record.claimed_by != Some(driver_id) {
            return Err(RegistryError::NotActive);
        }

        let remaining_m = haversine_m(&position, &record.booking.destination);
        if remaining_m > self.completion_radius_m {
            return Err(RegistryError::TooFar { remaining_m });
        }

        record.booking.status = BookingStatus::Completed;
        Ok(record.booking.clone())
    }

    async fn cancel(
        &self,
        driver_id: Uuid,
        booking_id: Uuid,
        _reason: &str,
    ) -> Result<(), RegistryError> {
        let mut record = self
            .records
            .get_mut(&booking_id)
            .ok_or(RegistryError::NotFound)?;

        if record.claimed_by == Some(driver_id) || record.claimed_by.is_none() {
            record.booking.status = BookingStatus::Cancelled;
            record.booking.agreed_fare = None;
            record.claimed_by = None;
            record.pending_counter = None;
        }

        Ok(())
    }

    async fn active_for_driver(&self, driver_id: Uuid) -> Result<Option<Booking>, RegistryError> {
        let active = self.records.iter().find_map(|record| {
            let in_progress = matches!(
                record.booking.status,
                BookingStatus::Accepted | BookingStatus::Active
            );
            (in_progress && record.claimed_by == Some(driver_id)).then(|| record.booking.clone())
        });

        Ok(active)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn coord(lat: f64, lng: f64) -> Coordinate {
        Coordinate { lat, lng }
    }

    fn seeded() -> (SimRegistry, Booking) {
        let registry = SimRegistry::new(300.0);
        let booking = registry.post_booking(
            "Ana",
            coord(14.505, 121.005),
            coord(14.520, 121.020),
            dec!(50),
        );
        (registry, booking)
    }

    #[tokio::test]
    async fn second_driver_loses_the_accept_race() {
        let (registry, booking) = seeded();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        let won = registry
            .respond(first, booking.id, BookingResponse::accept())
            .await
            .unwrap();
        assert_eq!(won.status, BookingStatus::Accepted);
        assert_eq!(won.agreed_fare, Some(dec!(50)));

        let lost = registry
            .respond(second, booking.id, BookingResponse::accept())
            .await;
        assert!(matches!(lost, Err(RegistryError::AlreadyClaimed)));
    }

    #[tokio::test]
    async fn counter_offer_awaits_passenger_then_claims_at_countered_fare() {
        let (registry, booking) = seeded();
        let driver = Uuid::new_v4();

        let countered = registry
            .respond(
                driver,
                booking.id,
                BookingResponse::counter(dec!(65), Some("uphill both ways".to_string())),
            )
            .await
            .unwrap();
        assert_eq!(countered.status, BookingStatus::Countered);
        assert_eq!(countered.agreed_fare, None);

        let accepted = registry.passenger_accept_counter(booking.id).unwrap();
        assert_eq!(accepted.status, BookingStatus::Accepted);
        assert_eq!(accepted.agreed_fare, Some(dec!(65)));

        let active = registry.active_for_driver(driver).await.unwrap();
        assert_eq!(active.map(|b| b.id), Some(booking.id));
    }

    #[tokio::test]
    async fn declined_counter_reenters_the_pool() {
        let (registry, booking) = seeded();
        let driver = Uuid::new_v4();

        registry
            .respond(driver, booking.id, BookingResponse::counter(dec!(70), None))
            .await
            .unwrap();

        let back = registry.passenger_decline_counter(booking.id, false).unwrap();
        assert_eq!(back.status, BookingStatus::Pending);
        assert_eq!(back.agreed_fare, None);

        let listed = registry
            .list_nearby(coord(14.50, 121.00), 5.0)
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn completion_is_gated_on_the_radius() {
        let (registry, booking) = seeded();
        let driver = Uuid::new_v4();

        registry
            .respond(driver, booking.id, BookingResponse::accept())
            .await
            .unwrap();

        let too_far = registry
            .complete(driver, booking.id, coord(14.50, 121.00))
            .await;
        assert!(matches!(too_far, Err(RegistryError::TooFar { .. })));

        let done = registry
            .complete(driver, booking.id, booking.destination)
            .await
            .unwrap();
        assert_eq!(done.status, BookingStatus::Completed);
        assert_eq!(done.agreed_fare, Some(dec!(50)));
    }

    #[tokio::test]
    async fn cancelling_a_claimed_booking_clears_the_agreed_fare() {
        let (registry, booking) = seeded();
        let driver = Uuid::new_v4();

        registry
            .respond(driver, booking.id, BookingResponse::accept())
            .await
            .unwrap();
        registry
            .cancel(driver, booking.id, "passenger no-show")
            .await
            .unwrap();

        let cancelled = registry.booking(booking.id).unwrap();
        assert_eq!(cancelled.status, BookingStatus::Cancelled);
        assert_eq!(cancelled.agreed_fare, None);

        assert!(registry.active_for_driver(driver).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn listing_excludes_claimed_and_out_of_radius_bookings() {
        let registry = SimRegistry::new(300.0);
        let near = registry.post_booking(
            "Ben",
            coord(14.505, 121.005),
            coord(14.52, 121.02),
            dec!(40),
        );
        registry.post_booking(
            "Carla",
            // Roughly 60 km north; outside a 5 km search radius.
            coord(15.05, 121.00),
            coord(15.06, 121.01),
            dec!(45),
        );
        let claimed = registry.post_booking(
            "Dina",
            coord(14.506, 121.006),
            coord(14.52, 121.02),
            dec!(55),
        );
        registry
            .respond(Uuid::new_v4(), claimed.id, BookingResponse::accept())
            .await
            .unwrap();

        let listed = registry
            .list_nearby(coord(14.50, 121.00), 5.0)
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, near.id);
    }
}
