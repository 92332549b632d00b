use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use crate::registry::RegistryError;

/// Everything the driver session can surface. None of these are fatal; the
/// session stays usable after any of them.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("location unavailable")]
    LocationUnavailable,

    #[error("no location fix yet")]
    LocationRequired,

    #[error("booking already claimed")]
    AlreadyClaimed,

    #[error("invalid counter offer: {0}")]
    InvalidOffer(String),

    #[error("not at destination: {remaining_m:.0} m remaining")]
    NotAtDestination { remaining_m: f64 },

    #[error("no active trip")]
    NotActive,

    #[error("booking not found")]
    NotFound,

    #[error("driver is offline")]
    Offline,

    #[error("a trip is already in progress")]
    TripInProgress,

    #[error("registry call failed: {0}")]
    Network(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<RegistryError> for SessionError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::AlreadyClaimed => SessionError::AlreadyClaimed,
            RegistryError::NotFound => SessionError::NotFound,
            RegistryError::NotActive => SessionError::NotActive,
            RegistryError::TooFar { remaining_m } => SessionError::NotAtDestination { remaining_m },
            RegistryError::Invalid(msg) => SessionError::InvalidOffer(msg),
            RegistryError::Network(msg) => SessionError::Network(msg),
        }
    }
}

impl IntoResponse for SessionError {
    fn into_response(self) -> Response {
        let status = match &self {
            SessionError::InvalidOffer(_) => StatusCode::BAD_REQUEST,
            SessionError::NotFound => StatusCode::NOT_FOUND,
            SessionError::AlreadyClaimed
            | SessionError::NotAtDestination { .. }
            | SessionError::NotActive
            | SessionError::LocationRequired
            | SessionError::Offline
            | SessionError::TripInProgress => StatusCode::CONFLICT,
            SessionError::Network(_) => StatusCode::BAD_GATEWAY,
            SessionError::LocationUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            SessionError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = match &self {
            SessionError::NotAtDestination { remaining_m } => Json(json!({
                "error": self.to_string(),
                "remaining_m": remaining_m,
            })),
            _ => Json(json!({
                "error": self.to_string()
            })),
        };

        (status, body).into_response()
    }
}
