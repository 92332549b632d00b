use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::engine::negotiation::{self, NegotiationEngine};
use crate::error::SessionError;
use crate::geo::haversine_m;
use crate::location::{LocationSource, LocationTracker, LocationUpdate, TrackerSettings};
use crate::models::booking::{Booking, BookingStatus, Coordinate, NearbyBooking};
use crate::observability::metrics::Metrics;
use crate::registry::BookingRegistry;

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub search_radius_km: f64,
    pub poll_interval: Duration,
    pub completion_radius_m: f64,
    pub event_buffer_size: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            search_radius_km: 5.0,
            poll_interval: Duration::from_secs(10),
            completion_radius_m: 300.0,
            event_buffer_size: 256,
        }
    }
}

/// The driver-visible session state. Owned by the session behind a mutex;
/// snapshots are cheap clones handed to the boundary. While a trip is
/// active the nearby list is empty and stays empty.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DriverSessionState {
    pub is_online: bool,
    pub current_location: Option<Coordinate>,
    pub nearby: Vec<NearbyBooking>,
    pub active: Option<Booking>,
    pub distance_to_destination_m: Option<f64>,
}

/// Informational events for the app shell, fanned out over the ws endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    Online,
    Offline,
    NearbyUpdated { count: usize },
    OfferSent { booking_id: Uuid },
    TripStarted { booking_id: Uuid },
    DistanceUpdated { meters: f64 },
    TripCompleted { booking_id: Uuid },
    TripCancelled { booking_id: Uuid },
}

/// Per-driver orchestrator. Cheap to clone; the backing state is shared.
///
/// Two background tasks feed the session: the nearby poll timer and the
/// location sample consumer. Both hold only a weak reference, so dropping
/// the last session handle ends them; `shutdown` ends them eagerly. No
/// lock is held across an await, and every effect re-checks its
/// precondition after the registry confirms, so late confirmations degrade
/// to no-ops.
pub struct DriverSession<R> {
    inner: Arc<SessionInner<R>>,
}

impl<R> Clone for DriverSession<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct SessionInner<R> {
    driver_id: Uuid,
    negotiation: NegotiationEngine<R>,
    settings: SessionSettings,
    state: Mutex<DriverSessionState>,
    events_tx: broadcast::Sender<SessionEvent>,
    tracker: LocationTracker,
    metrics: Metrics,
    poll_task: Mutex<Option<JoinHandle<()>>>,
    sample_task: Mutex<Option<JoinHandle<()>>>,
}

impl<R: BookingRegistry> DriverSession<R> {
    pub fn new(
        driver_id: Uuid,
        registry: Arc<R>,
        settings: SessionSettings,
        tracker_settings: TrackerSettings,
        location_source: Arc<dyn LocationSource>,
        metrics: Metrics,
    ) -> Self {
        let (events_tx, _unused_rx) = broadcast::channel(settings.event_buffer_size);

        Self {
            inner: Arc::new(SessionInner {
                driver_id,
                negotiation: NegotiationEngine::new(driver_id, registry),
                settings,
                state: Mutex::new(DriverSessionState::default()),
                events_tx,
                tracker: LocationTracker::new(tracker_settings, location_source),
                metrics,
                poll_task: Mutex::new(None),
                sample_task: Mutex::new(None),
            }),
        }
    }

    pub fn driver_id(&self) -> Uuid {
        self.inner.driver_id
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events_tx.subscribe()
    }

    pub fn snapshot(&self) -> DriverSessionState {
        self.inner.lock_state().clone()
    }

    pub fn tracking(&self) -> bool {
        self.inner.tracker.is_running()
    }

    /// Restore an in-progress trip after a restart. Called once at startup;
    /// a registry failure leaves the session usable with no active trip.
    pub async fn resume(&self) -> Result<(), SessionError> {
        let resumed = self
            .inner
            .negotiation
            .registry()
            .active_for_driver(self.inner.driver_id)
            .await?;

        if let Some(booking) = resumed {
            let booking = negotiation::activate(booking);
            info!(booking_id = %booking.id, "resuming in-progress trip");

            {
                let mut state = self.inner.lock_state();
                state.active = Some(booking.clone());
            }
            self.inner.metrics.trips_in_progress.set(1);
            start_sample_consumer(&self.inner);
            self.inner.emit(SessionEvent::TripStarted {
                booking_id: booking.id,
            });
        }

        Ok(())
    }

    /// Toggle the session online: start location tracking, fetch candidates
    /// once right away, then poll periodically. Idempotent.
    pub async fn go_online(&self) -> Result<(), SessionError> {
        {
            let mut state = self.inner.lock_state();
            if state.is_online {
                return Ok(());
            }
            state.is_online = true;
        }

        self.inner.metrics.session_online.set(1);
        self.inner.emit(SessionEvent::Online);
        info!(driver_id = %self.inner.driver_id, "driver online");

        // The nearby search needs fixes, so the tracker runs for the whole
        // online span, not just during trips.
        start_sample_consumer(&self.inner);

        // First fetch may legitimately find no location sample yet; the poll
        // will pick candidates up once a fix arrives.
        if let Err(err) = self.inner.refresh_nearby().await {
            warn!(error = %err, "initial nearby fetch failed");
        }

        let mut poll_task = self.inner.poll_task.lock().expect("poll task lock");
        if poll_task.as_ref().is_some_and(|task| !task.is_finished()) {
            return Ok(());
        }

        let inner = Arc::downgrade(&self.inner);
        let interval = self.inner.settings.poll_interval;
        *poll_task = Some(tokio::spawn(run_poll_loop(inner, interval)));

        Ok(())
    }

    /// Toggle the session offline: the poll stops outright, the candidate
    /// list empties. An active trip survives and still tracks location.
    pub fn go_offline(&self) {
        let had_active = {
            let mut state = self.inner.lock_state();
            if !state.is_online {
                return;
            }
            state.is_online = false;
            state.nearby.clear();
            state.active.is_some()
        };

        if let Some(task) = self.inner.poll_task.lock().expect("poll task lock").take() {
            task.abort();
        }
        if !had_active {
            self.inner.stop_sample_consumer();
        }

        self.inner.metrics.session_online.set(0);
        self.inner.metrics.nearby_bookings.set(0);
        self.inner.emit(SessionEvent::Offline);
        info!(driver_id = %self.inner.driver_id, "driver offline");
    }

    /// Fetch candidates around the current location. Pure read against the
    /// registry: booking state is never mutated here.
    pub async fn refresh_nearby(&self) -> Result<Vec<NearbyBooking>, SessionError> {
        self.inner.refresh_nearby().await
    }

    /// Claim a booking at the passenger's preferred fare. On confirmation
    /// the trip becomes active and polling effects are suspended; losing
    /// the claim race drops the candidate and leaves the session unmatched.
    pub async fn accept(&self, booking_id: Uuid) -> Result<Booking, SessionError> {
        self.inner.require_unmatched_online()?;

        match self.inner.negotiation.accept(booking_id).await {
            Ok(booking) => {
                self.inner.metrics.record_action("accept", "success");

                let applied = {
                    let mut state = self.inner.lock_state();
                    if !state.is_online || state.active.is_some() {
                        false
                    } else {
                        state.nearby.clear();
                        state.distance_to_destination_m = state
                            .current_location
                            .map(|loc| haversine_m(&loc, &booking.destination));
                        state.active = Some(booking.clone());
                        true
                    }
                };

                if !applied {
                    warn!(
                        booking_id = %booking_id,
                        "accept confirmed after preconditions lapsed; not applied locally"
                    );
                    return Ok(booking);
                }

                self.inner.metrics.nearby_bookings.set(0);
                self.inner.metrics.trips_in_progress.set(1);
                start_sample_consumer(&self.inner);
                self.inner.emit(SessionEvent::TripStarted {
                    booking_id: booking.id,
                });
                Ok(booking)
            }
            Err(err @ (SessionError::AlreadyClaimed | SessionError::NotFound)) => {
                self.inner.metrics.record_action("accept", "rejected");
                self.inner.drop_candidate(booking_id);
                Err(err)
            }
            Err(err) => {
                self.inner.metrics.record_action("accept", "error");
                Err(err)
            }
        }
    }

    /// Propose a different fare. The booking stays unclaimed; it is marked
    /// locally so the shell can render "pending your offer", and polling
    /// continues.
    pub async fn counter_offer(
        &self,
        booking_id: Uuid,
        fare: Decimal,
        message: Option<String>,
    ) -> Result<Booking, SessionError> {
        self.inner.require_unmatched_online()?;

        match self
            .inner
            .negotiation
            .counter(booking_id, fare, message)
            .await
        {
            Ok(confirmed) => {
                self.inner.metrics.record_action("counter", "success");

                {
                    let mut state = self.inner.lock_state();
                    if let Some(candidate) = state
                        .nearby
                        .iter_mut()
                        .find(|candidate| candidate.booking.id == booking_id)
                    {
                        candidate.booking.status = BookingStatus::Countered;
                        candidate.awaiting_passenger = true;
                    }
                }

                self.inner.emit(SessionEvent::OfferSent { booking_id });
                Ok(confirmed)
            }
            Err(err @ SessionError::InvalidOffer(_)) => {
                self.inner.metrics.record_action("counter", "invalid");
                Err(err)
            }
            Err(err @ (SessionError::AlreadyClaimed | SessionError::NotFound)) => {
                self.inner.metrics.record_action("counter", "rejected");
                self.inner.drop_candidate(booking_id);
                Err(err)
            }
            Err(err) => {
                self.inner.metrics.record_action("counter", "error");
                Err(err)
            }
        }
    }

    /// Finish the active trip. Only permitted within the completion radius
    /// (inclusive); outside it the attempt reports the remaining distance
    /// and changes nothing.
    pub async fn complete_trip(&self) -> Result<Booking, SessionError> {
        let (booking_id, position) = {
            let state = self.inner.lock_state();
            let active = state.active.as_ref().ok_or(SessionError::NotActive)?;
            negotiation::completion_guard(
                state.distance_to_destination_m,
                self.inner.settings.completion_radius_m,
            )?;
            let position = state
                .current_location
                .ok_or(SessionError::LocationRequired)?;
            (active.id, position)
        };

        match self.inner.negotiation.complete(booking_id, position).await {
            Ok(booking) => {
                self.inner.clear_active_trip();
                self.inner.metrics.record_trip("completed");
                self.inner.emit(SessionEvent::TripCompleted { booking_id });
                Ok(booking)
            }
            Err(err @ (SessionError::NotActive | SessionError::NotFound)) => {
                // The registry no longer recognizes the trip; the local
                // reference is stale and must go.
                warn!(booking_id = %booking_id, error = %err, "clearing stale active trip");
                self.inner.clear_active_trip();
                self.inner.metrics.record_trip("stale");
                Err(err)
            }
            Err(err) => {
                self.inner.metrics.record_action("complete", "error");
                Err(err)
            }
        }
    }

    /// Abandon the active trip. Locally terminal: the active state clears
    /// even when the registry write fails, but the failure is still
    /// returned so the caller can retry the audit write.
    pub async fn cancel_trip(&self, reason: &str) -> Result<(), SessionError> {
        let booking_id = {
            let state = self.inner.lock_state();
            state
                .active
                .as_ref()
                .map(|booking| booking.id)
                .ok_or(SessionError::NotActive)?
        };

        let result = self.inner.negotiation.cancel(booking_id, reason).await;
        if let Err(err) = &result {
            error!(booking_id = %booking_id, error = %err, "cancel not persisted by registry");
        }

        self.inner.clear_active_trip();
        self.inner.metrics.record_trip("cancelled");
        self.inner.emit(SessionEvent::TripCancelled { booking_id });
        result
    }

    /// Release everything the session holds: poll timer, sample consumer,
    /// tracker subscription. Callable from any path; dropping the last
    /// session handle has the same effect.
    pub fn shutdown(&self) {
        if let Some(task) = self.inner.poll_task.lock().expect("poll task lock").take() {
            task.abort();
        }
        self.inner.stop_sample_consumer();
    }
}

impl<R: BookingRegistry> SessionInner<R> {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, DriverSessionState> {
        self.state.lock().expect("session state lock")
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events_tx.send(event);
    }

    fn require_unmatched_online(&self) -> Result<(), SessionError> {
        let state = self.lock_state();
        if !state.is_online {
            return Err(SessionError::Offline);
        }
        if state.active.is_some() {
            return Err(SessionError::TripInProgress);
        }
        Ok(())
    }

    fn drop_candidate(&self, booking_id: Uuid) {
        let mut state = self.lock_state();
        state
            .nearby
            .retain(|candidate| candidate.booking.id != booking_id);
        self.metrics.nearby_bookings.set(state.nearby.len() as i64);
    }

    fn clear_active_trip(&self) {
        let keep_tracking = {
            let mut state = self.lock_state();
            state.active = None;
            state.distance_to_destination_m = None;
            // Tracking outlives the trip while the session is online: the
            // nearby search needs fixes too.
            state.is_online
        };

        self.metrics.trips_in_progress.set(0);
        if !keep_tracking {
            self.stop_sample_consumer();
        }
    }

    /// Responses that land after the session went offline or a trip started
    /// are discarded without touching the candidate list.
    async fn refresh_nearby(&self) -> Result<Vec<NearbyBooking>, SessionError> {
        let center = {
            let state = self.lock_state();
            if state.active.is_some() {
                return Ok(state.nearby.clone());
            }
            state
                .current_location
                .ok_or(SessionError::LocationRequired)?
        };

        let fetched = match self
            .negotiation
            .registry()
            .list_nearby(center, self.settings.search_radius_km)
            .await
        {
            Ok(bookings) => {
                self.metrics.record_poll("success");
                bookings
            }
            Err(err) => {
                self.metrics.record_poll("error");
                return Err(err.into());
            }
        };

        let nearby = {
            let mut state = self.lock_state();
            if !state.is_online || state.active.is_some() {
                debug!("discarding stale nearby response");
                return Ok(state.nearby.clone());
            }

            let nearby: Vec<NearbyBooking> = fetched
                .into_iter()
                .map(|booking| {
                    let awaiting_passenger = booking.status == BookingStatus::Countered
                        && state
                            .nearby
                            .iter()
                            .any(|prev| prev.booking.id == booking.id && prev.awaiting_passenger);
                    NearbyBooking {
                        pickup_distance_m: haversine_m(&center, &booking.pickup),
                        awaiting_passenger,
                        booking,
                    }
                })
                .collect();

            state.nearby = nearby.clone();
            nearby
        };

        self.metrics.nearby_bookings.set(nearby.len() as i64);
        self.emit(SessionEvent::NearbyUpdated {
            count: nearby.len(),
        });
        Ok(nearby)
    }

    /// Each sample updates the current location; during a trip the distance
    /// to destination is recomputed synchronously per sample.
    fn apply_location_update(&self, update: LocationUpdate) {
        let distance = {
            let mut state = self.lock_state();
            match update {
                LocationUpdate::Fix(fix) => {
                    state.current_location = Some(fix);
                    state.distance_to_destination_m = state
                        .active
                        .as_ref()
                        .map(|active| haversine_m(&fix, &active.destination));
                    state.distance_to_destination_m
                }
                LocationUpdate::Unavailable => {
                    state.current_location = None;
                    state.distance_to_destination_m = None;
                    None
                }
            }
        };

        if let Some(meters) = distance {
            self.metrics.distance_to_destination_m.set(meters);
            self.emit(SessionEvent::DistanceUpdated { meters });
        }
    }

    fn stop_sample_consumer(&self) {
        self.tracker.stop();
        if let Some(task) = self.sample_task.lock().expect("sample task lock").take() {
            task.abort();
        }
    }
}

impl<R> Drop for SessionInner<R> {
    fn drop(&mut self) {
        if let Some(task) = self.poll_task.lock().expect("poll task lock").take() {
            task.abort();
        }
        if let Some(task) = self.sample_task.lock().expect("sample task lock").take() {
            task.abort();
        }
        self.tracker.stop();
    }
}

async fn run_poll_loop<R: BookingRegistry>(inner: Weak<SessionInner<R>>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The immediate first tick duplicates the fetch go_online just did.
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let Some(session) = inner.upgrade() else {
            return;
        };

        {
            let state = session.lock_state();
            if !state.is_online {
                return;
            }
            // Poll effects are suspended during a trip; the timer keeps
            // ticking and no-ops.
            if state.active.is_some() {
                continue;
            }
        }

        match session.refresh_nearby().await {
            Ok(nearby) => debug!(count = nearby.len(), "nearby poll"),
            Err(SessionError::LocationRequired) => {
                debug!("nearby poll skipped: no location fix yet");
            }
            Err(err) => warn!(error = %err, "nearby poll failed"),
        }
    }
}

fn start_sample_consumer<R: BookingRegistry>(inner: &Arc<SessionInner<R>>) {
    let mut sample_task = inner.sample_task.lock().expect("sample task lock");
    if sample_task.as_ref().is_some_and(|task| !task.is_finished()) {
        inner.tracker.start();
        return;
    }

    // Subscribe before the sampler spawns so the first sample cannot slip by.
    let mut samples = inner.tracker.subscribe();
    inner.tracker.start();
    let weak = Arc::downgrade(inner);
    *sample_task = Some(tokio::spawn(async move {
        loop {
            match samples.recv().await {
                Ok(update) => {
                    let Some(session) = weak.upgrade() else {
                        return;
                    };
                    session.apply_location_update(update);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "location samples lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }));
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rust_decimal_macros::dec;
    use tokio::sync::mpsc;

    use super::*;
    use crate::location::PushLocationSource;
    use crate::registry::sim::SimRegistry;
    use crate::registry::{BookingRegistry, BookingResponse};

    struct Harness {
        session: DriverSession<SimRegistry>,
        registry: Arc<SimRegistry>,
        fixes: mpsc::Sender<Coordinate>,
    }

    fn harness() -> Harness {
        let registry = Arc::new(SimRegistry::new(300.0));
        let (fixes, source) = PushLocationSource::new(32);

        let session = DriverSession::new(
            Uuid::new_v4(),
            Arc::clone(&registry),
            SessionSettings {
                search_radius_km: 5.0,
                poll_interval: Duration::from_millis(20),
                completion_radius_m: 300.0,
                event_buffer_size: 64,
            },
            TrackerSettings {
                interval: Duration::from_millis(1),
                min_displacement_m: 1.0,
            },
            Arc::new(source),
            Metrics::new(),
        );

        Harness {
            session,
            registry,
            fixes,
        }
    }

    fn coord(lat: f64, lng: f64) -> Coordinate {
        Coordinate { lat, lng }
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached within 1s");
    }

    async fn online_with_fix(h: &Harness, fix: Coordinate) {
        h.session.go_online().await.unwrap();
        h.fixes.send(fix).await.unwrap();
        let session = h.session.clone();
        wait_until(move || session.snapshot().current_location.is_some()).await;
    }

    #[tokio::test]
    async fn refresh_requires_a_location_fix() {
        let h = harness();
        h.session.go_online().await.unwrap();

        let err = h.session.refresh_nearby().await;
        assert!(matches!(err, Err(SessionError::LocationRequired)));
    }

    #[tokio::test]
    async fn accept_makes_the_booking_the_active_trip() {
        let h = harness();
        let booking = h.registry.post_booking(
            "Ana",
            coord(14.505, 121.005),
            coord(14.520, 121.020),
            dec!(50),
        );

        online_with_fix(&h, coord(14.50, 121.00)).await;

        let nearby = h.session.refresh_nearby().await.unwrap();
        assert_eq!(nearby.len(), 1);
        assert!(nearby[0].pickup_distance_m > 0.0);

        let accepted = h.session.accept(booking.id).await.unwrap();
        assert_eq!(accepted.status, BookingStatus::Active);
        assert_eq!(accepted.agreed_fare, Some(dec!(50)));

        let snapshot = h.session.snapshot();
        assert!(snapshot.nearby.is_empty());
        assert_eq!(snapshot.active.as_ref().map(|b| b.id), Some(booking.id));
        assert!(h.session.tracking());

        // Poll effects are suspended while the trip is active. Let any
        // in-flight tick drain before taking the baseline.
        tokio::time::sleep(Duration::from_millis(30)).await;
        let polls_before = h.registry.list_calls();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(h.registry.list_calls(), polls_before);
    }

    #[tokio::test]
    async fn losing_the_claim_race_drops_the_candidate() {
        let h = harness();
        let booking = h.registry.post_booking(
            "Ben",
            coord(14.505, 121.005),
            coord(14.520, 121.020),
            dec!(40),
        );

        online_with_fix(&h, coord(14.50, 121.00)).await;
        let nearby = h.session.refresh_nearby().await.unwrap();
        assert_eq!(nearby.len(), 1);

        // Another driver wins the race server-side.
        h.registry
            .respond(Uuid::new_v4(), booking.id, BookingResponse::accept())
            .await
            .unwrap();

        let lost = h.session.accept(booking.id).await;
        assert!(matches!(lost, Err(SessionError::AlreadyClaimed)));

        let snapshot = h.session.snapshot();
        assert!(snapshot.nearby.is_empty());
        assert!(snapshot.active.is_none());
    }

    #[tokio::test]
    async fn invalid_counter_offer_never_reaches_the_registry() {
        let h = harness();
        let booking = h.registry.post_booking(
            "Carla",
            coord(14.505, 121.005),
            coord(14.520, 121.020),
            dec!(45),
        );

        online_with_fix(&h, coord(14.50, 121.00)).await;
        h.session.refresh_nearby().await.unwrap();

        let before = h.registry.respond_calls();
        let rejected = h
            .session
            .counter_offer(booking.id, dec!(-5), Some(String::new()))
            .await;

        assert!(matches!(rejected, Err(SessionError::InvalidOffer(_))));
        assert_eq!(h.registry.respond_calls(), before);
    }

    #[tokio::test]
    async fn counter_offer_marks_the_candidate_and_keeps_polling() {
        let h = harness();
        let booking = h.registry.post_booking(
            "Dina",
            coord(14.505, 121.005),
            coord(14.520, 121.020),
            dec!(45),
        );

        online_with_fix(&h, coord(14.50, 121.00)).await;
        h.session.refresh_nearby().await.unwrap();

        let confirmed = h
            .session
            .counter_offer(
                booking.id,
                dec!(60),
                Some("traffic on the bridge".to_string()),
            )
            .await
            .unwrap();
        assert_eq!(confirmed.status, BookingStatus::Countered);

        let snapshot = h.session.snapshot();
        assert!(snapshot.active.is_none());
        assert_eq!(snapshot.nearby.len(), 1);
        assert!(snapshot.nearby[0].awaiting_passenger);
        assert_eq!(snapshot.nearby[0].booking.status, BookingStatus::Countered);

        // Still unmatched: polling keeps fetching, and the countered marker
        // survives the refresh.
        let polls_before = h.registry.list_calls();
        let registry = Arc::clone(&h.registry);
        wait_until(move || registry.list_calls() > polls_before).await;
        let snapshot = h.session.snapshot();
        assert_eq!(snapshot.nearby.len(), 1);
        assert!(snapshot.nearby[0].awaiting_passenger);
    }

    #[tokio::test]
    async fn going_offline_clears_candidates_and_halts_the_poll() {
        let h = harness();
        h.registry.post_booking(
            "Elle",
            coord(14.505, 121.005),
            coord(14.520, 121.020),
            dec!(45),
        );

        online_with_fix(&h, coord(14.50, 121.00)).await;
        let nearby = h.session.refresh_nearby().await.unwrap();
        assert!(!nearby.is_empty());

        h.session.go_offline();
        assert!(h.session.snapshot().nearby.is_empty());

        // Let any in-flight tick drain before taking the baseline.
        tokio::time::sleep(Duration::from_millis(30)).await;
        let polls_before = h.registry.list_calls();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(h.registry.list_calls(), polls_before);
    }

    #[tokio::test]
    async fn completion_is_rejected_outside_the_radius_and_keeps_the_trip() {
        let h = harness();
        let booking = h.registry.post_booking(
            "Faye",
            coord(14.505, 121.005),
            coord(14.520, 121.020),
            dec!(50),
        );

        online_with_fix(&h, coord(14.50, 121.00)).await;
        h.session.refresh_nearby().await.unwrap();
        h.session.accept(booking.id).await.unwrap();

        // Still at the pickup end of town, kilometers from the destination.
        let premature = h.session.complete_trip().await;
        match premature {
            Err(SessionError::NotAtDestination { remaining_m }) => {
                assert!(remaining_m > 300.0);
            }
            other => panic!("expected NotAtDestination, got {other:?}"),
        }
        assert!(h.session.snapshot().active.is_some());

        // Arrive at the destination; the distance recomputes per sample and
        // the completion guard opens.
        h.fixes.send(coord(14.520, 121.020)).await.unwrap();
        let session = h.session.clone();
        wait_until(move || {
            session
                .snapshot()
                .distance_to_destination_m
                .is_some_and(|d| d <= 300.0)
        })
        .await;

        let done = h.session.complete_trip().await.unwrap();
        assert_eq!(done.status, BookingStatus::Completed);

        let snapshot = h.session.snapshot();
        assert!(snapshot.active.is_none());
        assert!(snapshot.distance_to_destination_m.is_none());
    }

    #[tokio::test]
    async fn cancellation_clears_local_state_even_when_the_registry_fails() {
        let h = harness();
        let booking = h.registry.post_booking(
            "Gail",
            coord(14.505, 121.005),
            coord(14.520, 121.020),
            dec!(50),
        );

        online_with_fix(&h, coord(14.50, 121.00)).await;
        h.session.refresh_nearby().await.unwrap();
        h.session.accept(booking.id).await.unwrap();

        // Registry loses the booking; the cancel write will fail.
        h.registry.forget(booking.id);

        let result = h.session.cancel_trip("passenger no-show").await;
        assert!(matches!(result, Err(SessionError::NotFound)));
        assert!(h.session.snapshot().active.is_none());
    }

    #[tokio::test]
    async fn resume_restores_an_in_progress_trip() {
        let h = harness();
        let booking = h.registry.post_booking(
            "Hana",
            coord(14.505, 121.005),
            coord(14.520, 121.020),
            dec!(55),
        );
        h.registry
            .respond(h.session.driver_id(), booking.id, BookingResponse::accept())
            .await
            .unwrap();

        h.session.resume().await.unwrap();

        let snapshot = h.session.snapshot();
        let active = snapshot.active.expect("trip restored");
        assert_eq!(active.id, booking.id);
        assert_eq!(active.status, BookingStatus::Active);
        assert_eq!(active.agreed_fare, Some(dec!(55)));
        assert!(h.session.tracking());
    }

    #[tokio::test]
    async fn actions_require_an_online_unmatched_session() {
        let h = harness();
        let booking = h.registry.post_booking(
            "Iris",
            coord(14.505, 121.005),
            coord(14.520, 121.020),
            dec!(50),
        );

        let offline = h.session.accept(booking.id).await;
        assert!(matches!(offline, Err(SessionError::Offline)));

        online_with_fix(&h, coord(14.50, 121.00)).await;
        h.session.refresh_nearby().await.unwrap();
        h.session.accept(booking.id).await.unwrap();

        let second = h.registry.post_booking(
            "Joy",
            coord(14.506, 121.006),
            coord(14.52, 121.02),
            dec!(50),
        );
        let busy = h.session.accept(second.id).await;
        assert!(matches!(busy, Err(SessionError::TripInProgress)));
    }
}
