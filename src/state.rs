use tokio::sync::mpsc;

use crate::engine::session::DriverSession;
use crate::models::booking::Coordinate;
use crate::observability::metrics::Metrics;
use crate::registry::BookingRegistry;

/// Everything the HTTP boundary needs: the one driver session this process
/// hosts, the intake queue for device fixes, and the metrics registry.
pub struct AppState<R> {
    pub session: DriverSession<R>,
    pub location_tx: mpsc::Sender<Coordinate>,
    pub metrics: Metrics,
}

impl<R: BookingRegistry> AppState<R> {
    pub fn new(
        session: DriverSession<R>,
        location_tx: mpsc::Sender<Coordinate>,
        metrics: Metrics,
    ) -> Self {
        Self {
            session,
            location_tx,
            metrics,
        }
    }
}
