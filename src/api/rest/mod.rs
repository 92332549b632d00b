pub mod session;
pub mod ws;

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use serde::Serialize;
use tower_http::cors::CorsLayer;

use crate::registry::BookingRegistry;
use crate::state::AppState;

pub fn router<R: BookingRegistry>(state: Arc<AppState<R>>) -> Router {
    Router::new()
        .merge(session::router::<R>())
        .route("/health", get(health::<R>))
        .route("/metrics", get(metrics::<R>))
        .route("/ws", get(ws::ws_handler::<R>))
        .with_state(state)
        // The app shell is a webview on another origin.
        .layer(CorsLayer::permissive())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    online: bool,
    nearby: usize,
    on_trip: bool,
}

async fn health<R: BookingRegistry>(State(state): State<Arc<AppState<R>>>) -> Json<HealthResponse> {
    let snapshot = state.session.snapshot();
    Json(HealthResponse {
        status: "ok",
        online: snapshot.is_online,
        nearby: snapshot.nearby.len(),
        on_trip: snapshot.active.is_some(),
    })
}

async fn metrics<R: BookingRegistry>(State(state): State<Arc<AppState<R>>>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err).into_response(),
    }
}
