pub mod http;
pub mod sim;

use std::future::Future;

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::models::booking::{Booking, Coordinate};

/// Ways a registry call can fail. Everything except `Network` is a
/// server-side verdict the session translates into a local state change.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("booking already claimed")]
    AlreadyClaimed,

    #[error("booking not found")]
    NotFound,

    #[error("booking is not active")]
    NotActive,

    #[error("too far from destination: {remaining_m:.0} m remaining")]
    TooFar { remaining_m: f64 },

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("network failure: {0}")]
    Network(String),
}

/// Driver's answer to a pending booking: a plain accept, or a counter offer
/// awaiting passenger confirmation.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BookingResponse {
    pub accept: bool,
    pub counter_offer: Option<Decimal>,
    pub message: Option<String>,
}

impl BookingResponse {
    pub fn accept() -> Self {
        Self {
            accept: true,
            counter_offer: None,
            message: None,
        }
    }

    pub fn counter(fare: Decimal, message: Option<String>) -> Self {
        Self {
            accept: false,
            counter_offer: Some(fare),
            message,
        }
    }
}

/// The server-side booking store, seen through the narrow interface the
/// session needs. Claim races are resolved on the registry's side; a lost
/// race surfaces here as `AlreadyClaimed`.
pub trait BookingRegistry: Send + Sync + 'static {
    fn list_nearby(
        &self,
        center: Coordinate,
        radius_km: f64,
    ) -> impl Future<Output = Result<Vec<Booking>, RegistryError>> + Send;

    fn respond(
        &self,
        driver_id: Uuid,
        booking_id: Uuid,
        response: BookingResponse,
    ) -> impl Future<Output = Result<Booking, RegistryError>> + Send;

    fn complete(
        &self,
        driver_id: Uuid,
        booking_id: Uuid,
        position: Coordinate,
    ) -> impl Future<Output = Result<Booking, RegistryError>> + Send;

    fn cancel(
        &self,
        driver_id: Uuid,
        booking_id: Uuid,
        reason: &str,
    ) -> impl Future<Output = Result<(), RegistryError>> + Send;

    /// In-progress booking for this driver, if any. Used once at session
    /// start to resume a trip after an app restart.
    fn active_for_driver(
        &self,
        driver_id: Uuid,
    ) -> impl Future<Output = Result<Option<Booking>, RegistryError>> + Send;
}
