use std::env;
use std::time::Duration;

use uuid::Uuid;

use crate::engine::session::SessionSettings;
use crate::error::SessionError;
use crate::location::TrackerSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryMode {
    /// Remote registry over REST.
    Http,
    /// In-memory registry with seeded demo bookings; local development.
    Sim,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub driver_id: Uuid,
    pub registry_mode: RegistryMode,
    pub registry_url: String,
    pub registry_token: String,
    pub search_radius_km: f64,
    pub poll_interval_ms: u64,
    pub completion_radius_m: f64,
    pub location_interval_ms: u64,
    pub location_min_displacement_m: f64,
    pub event_buffer_size: usize,
    pub location_queue_size: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, SessionError> {
        let _ = dotenvy::dotenv();

        let driver_id = match env::var("DRIVER_ID") {
            Ok(raw) => raw
                .parse::<Uuid>()
                .map_err(|err| SessionError::Internal(format!("invalid DRIVER_ID: {err}")))?,
            Err(_) => Uuid::new_v4(),
        };

        let registry_mode = match env::var("REGISTRY_MODE").as_deref() {
            Ok("sim") => RegistryMode::Sim,
            Ok("http") | Err(_) => RegistryMode::Http,
            Ok(other) => {
                return Err(SessionError::Internal(format!(
                    "invalid REGISTRY_MODE: {other}"
                )));
            }
        };

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            driver_id,
            registry_mode,
            registry_url: env::var("REGISTRY_URL")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),
            registry_token: env::var("REGISTRY_TOKEN").unwrap_or_default(),
            search_radius_km: parse_or_default("SEARCH_RADIUS_KM", 5.0)?,
            poll_interval_ms: parse_or_default("POLL_INTERVAL_MS", 10_000)?,
            completion_radius_m: parse_or_default("COMPLETION_RADIUS_M", 300.0)?,
            location_interval_ms: parse_or_default("LOCATION_INTERVAL_MS", 5_000)?,
            location_min_displacement_m: parse_or_default("LOCATION_MIN_DISPLACEMENT_M", 10.0)?,
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 256)?,
            location_queue_size: parse_or_default("LOCATION_QUEUE_SIZE", 64)?,
        })
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            search_radius_km: self.search_radius_km,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            completion_radius_m: self.completion_radius_m,
            event_buffer_size: self.event_buffer_size,
        }
    }

    pub fn tracker_settings(&self) -> TrackerSettings {
        TrackerSettings {
            interval: Duration::from_millis(self.location_interval_ms),
            min_displacement_m: self.location_min_displacement_m,
        }
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, SessionError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| SessionError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
