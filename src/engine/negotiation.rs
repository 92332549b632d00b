use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::info;
use uuid::Uuid;

use crate::error::SessionError;
use crate::models::booking::{Booking, BookingStatus, Coordinate, CounterOffer};
use crate::registry::{BookingRegistry, BookingResponse};

/// Drives a single booking's negotiation transitions against the registry.
/// Transitions are requested remotely and only considered to have happened
/// when the registry confirms them; the session applies local effects
/// afterwards.
pub struct NegotiationEngine<R> {
    driver_id: Uuid,
    registry: Arc<R>,
}

impl<R: BookingRegistry> NegotiationEngine<R> {
    pub fn new(driver_id: Uuid, registry: Arc<R>) -> Self {
        Self {
            driver_id,
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<R> {
        &self.registry
    }

    /// pending → active. The confirmed booking comes back claimed; the trip
    /// starts at confirmation, so a registry-side `Accepted` is promoted to
    /// `Active` with the agreed fare guaranteed.
    pub async fn accept(&self, booking_id: Uuid) -> Result<Booking, SessionError> {
        let confirmed = self
            .registry
            .respond(self.driver_id, booking_id, BookingResponse::accept())
            .await?;

        info!(booking_id = %booking_id, fare = %confirmed.preferred_fare, "booking accepted");
        Ok(activate(confirmed))
    }

    /// pending → countered. The fare is validated locally; a non-positive
    /// proposal never reaches the network.
    pub async fn counter(
        &self,
        booking_id: Uuid,
        proposed_fare: Decimal,
        message: Option<String>,
    ) -> Result<Booking, SessionError> {
        let offer = CounterOffer {
            booking_id,
            proposed_fare,
            message,
        };
        validate_offer(&offer)?;

        let confirmed = self
            .registry
            .respond(
                self.driver_id,
                booking_id,
                BookingResponse::counter(offer.proposed_fare, offer.message),
            )
            .await?;

        info!(booking_id = %booking_id, fare = %proposed_fare, "counter offer submitted");
        Ok(confirmed)
    }

    /// active → completed. The radius guard is the session's job; the
    /// registry re-checks it server-side and may still answer `TooFar`.
    pub async fn complete(
        &self,
        booking_id: Uuid,
        position: Coordinate,
    ) -> Result<Booking, SessionError> {
        let confirmed = self
            .registry
            .complete(self.driver_id, booking_id, position)
            .await?;

        info!(booking_id = %booking_id, "trip completed");
        Ok(confirmed)
    }

    /// active → cancelled.
    pub async fn cancel(&self, booking_id: Uuid, reason: &str) -> Result<(), SessionError> {
        self.registry
            .cancel(self.driver_id, booking_id, reason)
            .await?;

        info!(booking_id = %booking_id, reason, "trip cancelled");
        Ok(())
    }
}

/// Local validation of a counter offer, performed before any network call.
pub fn validate_offer(offer: &CounterOffer) -> Result<(), SessionError> {
    if offer.proposed_fare <= Decimal::ZERO {
        return Err(SessionError::InvalidOffer(format!(
            "fare must be positive, got {}",
            offer.proposed_fare
        )));
    }
    Ok(())
}

/// Normalize a confirmed claim into the active trip the session holds:
/// status forced to `Active`, agreed fare guaranteed.
pub fn activate(mut booking: Booking) -> Booking {
    booking.status = BookingStatus::Active;
    if booking.agreed_fare.is_none() {
        booking.agreed_fare = Some(booking.preferred_fare);
    }
    booking
}

/// Completion-radius guard: inclusive at the boundary. `remaining_m` is
/// reported back for user feedback on a premature attempt.
pub fn completion_guard(
    distance_to_destination_m: Option<f64>,
    completion_radius_m: f64,
) -> Result<f64, SessionError> {
    let remaining_m = distance_to_destination_m.ok_or(SessionError::LocationRequired)?;
    if remaining_m > completion_radius_m {
        return Err(SessionError::NotAtDestination { remaining_m });
    }
    Ok(remaining_m)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::models::booking::Coordinate;

    fn offer(fare: Decimal) -> CounterOffer {
        CounterOffer {
            booking_id: Uuid::new_v4(),
            proposed_fare: fare,
            message: None,
        }
    }

    #[test]
    fn negative_and_zero_fares_are_rejected_locally() {
        assert!(matches!(
            validate_offer(&offer(dec!(-5))),
            Err(SessionError::InvalidOffer(_))
        ));
        assert!(matches!(
            validate_offer(&offer(dec!(0))),
            Err(SessionError::InvalidOffer(_))
        ));
        assert!(validate_offer(&offer(dec!(0.01))).is_ok());
    }

    #[test]
    fn completion_guard_is_inclusive_at_the_radius() {
        assert_eq!(completion_guard(Some(300.0), 300.0).unwrap(), 300.0);

        let premature = completion_guard(Some(301.0), 300.0);
        assert!(matches!(
            premature,
            Err(SessionError::NotAtDestination { remaining_m }) if remaining_m == 301.0
        ));
    }

    #[test]
    fn completion_guard_requires_a_known_distance() {
        assert!(matches!(
            completion_guard(None, 300.0),
            Err(SessionError::LocationRequired)
        ));
    }

    #[test]
    fn activation_promotes_status_and_fills_the_agreed_fare() {
        let booking = Booking {
            id: Uuid::new_v4(),
            passenger: "Ana".to_string(),
            pickup: Coordinate {
                lat: 14.505,
                lng: 121.005,
            },
            destination: Coordinate {
                lat: 14.52,
                lng: 121.02,
            },
            preferred_fare: dec!(50),
            agreed_fare: None,
            status: BookingStatus::Accepted,
            created_at: Utc::now(),
        };

        let active = activate(booking);
        assert_eq!(active.status, BookingStatus::Active);
        assert_eq!(active.agreed_fare, Some(dec!(50)));
    }
}
