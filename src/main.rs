use std::sync::Arc;

use rust_decimal::Decimal;
use tracing_subscriber::EnvFilter;

use trike_driver::api;
use trike_driver::config::{Config, RegistryMode};
use trike_driver::engine::session::DriverSession;
use trike_driver::error::SessionError;
use trike_driver::location::PushLocationSource;
use trike_driver::models::booking::Coordinate;
use trike_driver::observability::metrics::Metrics;
use trike_driver::registry::BookingRegistry;
use trike_driver::registry::http::HttpRegistry;
use trike_driver::registry::sim::SimRegistry;
use trike_driver::state::AppState;

#[tokio::main]
async fn main() -> Result<(), SessionError> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false)
        .compact()
        .init();

    match config.registry_mode {
        RegistryMode::Http => {
            let registry = HttpRegistry::new(&config.registry_url, &config.registry_token)
                .map_err(|err| SessionError::Internal(format!("registry client: {err}")))?;
            run(config, Arc::new(registry)).await
        }
        RegistryMode::Sim => {
            let registry = SimRegistry::new(config.completion_radius_m);
            seed_demo_bookings(&registry);
            run(config, Arc::new(registry)).await
        }
    }
}

async fn run<R: BookingRegistry>(config: Config, registry: Arc<R>) -> Result<(), SessionError> {
    let metrics = Metrics::new();
    let (location_tx, location_source) = PushLocationSource::new(config.location_queue_size);

    let session = DriverSession::new(
        config.driver_id,
        registry,
        config.session_settings(),
        config.tracker_settings(),
        Arc::new(location_source),
        metrics.clone(),
    );

    if let Err(err) = session.resume().await {
        tracing::warn!(error = %err, "could not check for an in-progress trip");
    }

    let state = Arc::new(AppState::new(session.clone(), location_tx, metrics));
    let app = api::rest::router(state);

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| SessionError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(
        http_port = config.http_port,
        driver_id = %config.driver_id,
        "driver session daemon started"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| SessionError::Internal(format!("server error: {err}")))?;

    session.shutdown();
    Ok(())
}

/// Sim mode: a few pending bookings around Pasig so the flow can be driven
/// end to end without a real registry.
fn seed_demo_bookings(registry: &SimRegistry) {
    let seeds = [
        ("Ana", 14.5209, 121.0530, 14.5733, 121.0850, 60),
        ("Marco", 14.5155, 121.0470, 14.5350, 121.0560, 45),
        ("Liza", 14.5181, 121.0614, 14.5015, 121.0422, 50),
    ];

    for (passenger, p_lat, p_lng, d_lat, d_lng, fare) in seeds {
        registry.post_booking(
            passenger,
            Coordinate {
                lat: p_lat,
                lng: p_lng,
            },
            Coordinate {
                lat: d_lat,
                lng: d_lng,
            },
            Decimal::from(fare),
        );
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
