use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::geo::haversine_m;
use crate::models::booking::Coordinate;

#[derive(Debug, Error)]
pub enum LocationError {
    #[error("location unavailable")]
    Unavailable,

    #[error("location source closed")]
    SourceClosed,
}

/// One item on the tracker's output stream. `Unavailable` tells consumers to
/// treat the current location as absent until a fix comes back.
#[derive(Debug, Clone, Copy)]
pub enum LocationUpdate {
    Fix(Coordinate),
    Unavailable,
}

/// Raw fix producer: the device sensor, or whatever stands in for it.
/// Boxed futures keep the trait object-safe so the tracker can own any
/// source behind `Arc<dyn LocationSource>`.
pub trait LocationSource: Send + Sync {
    fn next_fix(&self) -> BoxFuture<'_, Result<Coordinate, LocationError>>;
}

#[derive(Debug, Clone, Copy)]
pub struct TrackerSettings {
    /// Minimum time between emitted samples.
    pub interval: Duration,
    /// Minimum displacement between emitted samples, meters.
    pub min_displacement_m: f64,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(5_000),
            min_displacement_m: 10.0,
        }
    }
}

/// Filters the raw fix stream down to samples that moved far enough and are
/// spaced far enough apart, then broadcasts them. `start` is idempotent;
/// `stop` aborts the filter task unconditionally, as does dropping the
/// tracker.
pub struct LocationTracker {
    settings: TrackerSettings,
    source: Arc<dyn LocationSource>,
    samples_tx: broadcast::Sender<LocationUpdate>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LocationTracker {
    pub fn new(settings: TrackerSettings, source: Arc<dyn LocationSource>) -> Self {
        let (samples_tx, _unused_rx) = broadcast::channel(32);
        Self {
            settings,
            source,
            samples_tx,
            task: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LocationUpdate> {
        self.samples_tx.subscribe()
    }

    /// Spawn the sampling task if it is not already running.
    pub fn start(&self) {
        let mut task = self.task.lock().expect("tracker task lock");
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let source = self.source.clone();
        let samples_tx = self.samples_tx.clone();
        let settings = self.settings;

        *task = Some(tokio::spawn(async move {
            run_sampler(settings, source, samples_tx).await;
        }));
    }

    /// Abort the sampling task and release the source subscription. Safe to
    /// call at any time, including when the tracker never started.
    pub fn stop(&self) {
        if let Some(handle) = self.task.lock().expect("tracker task lock").take() {
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .expect("tracker task lock")
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for LocationTracker {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_sampler(
    settings: TrackerSettings,
    source: Arc<dyn LocationSource>,
    samples_tx: broadcast::Sender<LocationUpdate>,
) {
    let mut last_emitted: Option<Coordinate> = None;
    let mut throttle = tokio::time::interval(settings.interval);
    throttle.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        // The first tick fires immediately; afterwards this enforces the
        // minimum spacing between emitted samples.
        throttle.tick().await;

        match source.next_fix().await {
            Ok(fix) => {
                if let Some(prev) = last_emitted {
                    let moved_m = haversine_m(&prev, &fix);
                    if moved_m < settings.min_displacement_m {
                        debug!(moved_m, "fix below displacement threshold; skipping");
                        continue;
                    }
                }

                last_emitted = Some(fix);
                let _ = samples_tx.send(LocationUpdate::Fix(fix));
            }
            Err(LocationError::SourceClosed) => {
                warn!("location source closed; sampler exiting");
                let _ = samples_tx.send(LocationUpdate::Unavailable);
                return;
            }
            Err(LocationError::Unavailable) => {
                warn!("location acquisition failed");
                last_emitted = None;
                let _ = samples_tx.send(LocationUpdate::Unavailable);
            }
        }
    }
}

/// Production source: the app shell owns the GPS sensor and pushes fixes
/// into this queue through the HTTP boundary.
pub struct PushLocationSource {
    fixes: tokio::sync::Mutex<mpsc::Receiver<Coordinate>>,
}

impl PushLocationSource {
    pub fn new(queue_size: usize) -> (mpsc::Sender<Coordinate>, Self) {
        let (tx, rx) = mpsc::channel(queue_size);
        (
            tx,
            Self {
                fixes: tokio::sync::Mutex::new(rx),
            },
        )
    }
}

impl LocationSource for PushLocationSource {
    fn next_fix(&self) -> BoxFuture<'_, Result<Coordinate, LocationError>> {
        Box::pin(async move {
            let mut fixes = self.fixes.lock().await;
            fixes.recv().await.ok_or(LocationError::SourceClosed)
        })
    }
}
