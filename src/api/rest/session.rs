use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use crate::engine::session::DriverSessionState;
use crate::error::SessionError;
use crate::models::booking::{Booking, Coordinate, NearbyBooking};
use crate::registry::BookingRegistry;
use crate::state::AppState;

pub fn router<R: BookingRegistry>() -> Router<Arc<AppState<R>>> {
    Router::new()
        .route("/session", get(get_session::<R>))
        .route("/session/online", post(go_online::<R>))
        .route("/session/offline", post(go_offline::<R>))
        .route("/session/location", post(report_location::<R>))
        .route("/session/nearby", get(refresh_nearby::<R>))
        .route("/bookings/:id/accept", post(accept_booking::<R>))
        .route("/bookings/:id/counter", post(counter_booking::<R>))
        .route("/trip/complete", post(complete_trip::<R>))
        .route("/trip/cancel", post(cancel_trip::<R>))
}

#[derive(Deserialize)]
pub struct LocationFix {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Deserialize)]
pub struct CounterRequest {
    pub fare: Decimal,
    pub message: Option<String>,
}

#[derive(Deserialize)]
pub struct CancelRequest {
    pub reason: String,
}

async fn get_session<R: BookingRegistry>(
    State(state): State<Arc<AppState<R>>>,
) -> Json<DriverSessionState> {
    Json(state.session.snapshot())
}

async fn go_online<R: BookingRegistry>(
    State(state): State<Arc<AppState<R>>>,
) -> Result<Json<DriverSessionState>, SessionError> {
    state.session.go_online().await?;
    Ok(Json(state.session.snapshot()))
}

async fn go_offline<R: BookingRegistry>(
    State(state): State<Arc<AppState<R>>>,
) -> Json<DriverSessionState> {
    state.session.go_offline();
    Json(state.session.snapshot())
}

/// Device fix from the shell. Lossy by design: a full queue drops the fix,
/// the next one supersedes it anyway.
async fn report_location<R: BookingRegistry>(
    State(state): State<Arc<AppState<R>>>,
    Json(payload): Json<LocationFix>,
) -> StatusCode {
    let fix = Coordinate {
        lat: payload.lat,
        lng: payload.lng,
    };
    if state.location_tx.try_send(fix).is_err() {
        debug!("location queue full; fix dropped");
    }
    StatusCode::ACCEPTED
}

async fn refresh_nearby<R: BookingRegistry>(
    State(state): State<Arc<AppState<R>>>,
) -> Result<Json<Vec<NearbyBooking>>, SessionError> {
    let nearby = state.session.refresh_nearby().await?;
    Ok(Json(nearby))
}

async fn accept_booking<R: BookingRegistry>(
    State(state): State<Arc<AppState<R>>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Booking>, SessionError> {
    let booking = state.session.accept(id).await?;
    Ok(Json(booking))
}

async fn counter_booking<R: BookingRegistry>(
    State(state): State<Arc<AppState<R>>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CounterRequest>,
) -> Result<Json<Booking>, SessionError> {
    let booking = state
        .session
        .counter_offer(id, payload.fare, payload.message)
        .await?;
    Ok(Json(booking))
}

async fn complete_trip<R: BookingRegistry>(
    State(state): State<Arc<AppState<R>>>,
) -> Result<Json<Booking>, SessionError> {
    let booking = state.session.complete_trip().await?;
    Ok(Json(booking))
}

async fn cancel_trip<R: BookingRegistry>(
    State(state): State<Arc<AppState<R>>>,
    Json(payload): Json<CancelRequest>,
) -> Result<StatusCode, SessionError> {
    state.session.cancel_trip(&payload.reason).await?;
    Ok(StatusCode::NO_CONTENT)
}
