use prometheus::{Encoder, Gauge, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub nearby_polls_total: IntCounterVec,
    pub negotiation_actions_total: IntCounterVec,
    pub trips_total: IntCounterVec,
    pub session_online: IntGauge,
    pub nearby_bookings: IntGauge,
    pub trips_in_progress: IntGauge,
    pub distance_to_destination_m: Gauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let nearby_polls_total = IntCounterVec::new(
            Opts::new("nearby_polls_total", "Nearby booking fetches by outcome"),
            &["outcome"],
        )
        .expect("valid nearby_polls_total metric");

        let negotiation_actions_total = IntCounterVec::new(
            Opts::new(
                "negotiation_actions_total",
                "Accept/counter/complete actions by outcome",
            ),
            &["action", "outcome"],
        )
        .expect("valid negotiation_actions_total metric");

        let trips_total = IntCounterVec::new(
            Opts::new("trips_total", "Finished trips by outcome"),
            &["outcome"],
        )
        .expect("valid trips_total metric");

        let session_online = IntGauge::new("session_online", "1 while the driver is online")
            .expect("valid session_online metric");

        let nearby_bookings = IntGauge::new(
            "nearby_bookings",
            "Candidate bookings currently shown to the driver",
        )
        .expect("valid nearby_bookings metric");

        let trips_in_progress = IntGauge::new(
            "trips_in_progress",
            "1 while a booking is active for this driver",
        )
        .expect("valid trips_in_progress metric");

        let distance_to_destination_m = Gauge::new(
            "distance_to_destination_meters",
            "Distance from the last fix to the active trip's destination",
        )
        .expect("valid distance_to_destination_meters metric");

        registry
            .register(Box::new(nearby_polls_total.clone()))
            .expect("register nearby_polls_total");
        registry
            .register(Box::new(negotiation_actions_total.clone()))
            .expect("register negotiation_actions_total");
        registry
            .register(Box::new(trips_total.clone()))
            .expect("register trips_total");
        registry
            .register(Box::new(session_online.clone()))
            .expect("register session_online");
        registry
            .register(Box::new(nearby_bookings.clone()))
            .expect("register nearby_bookings");
        registry
            .register(Box::new(trips_in_progress.clone()))
            .expect("register trips_in_progress");
        registry
            .register(Box::new(distance_to_destination_m.clone()))
            .expect("register distance_to_destination_meters");

        Self {
            registry,
            nearby_polls_total,
            negotiation_actions_total,
            trips_total,
            session_online,
            nearby_bookings,
            trips_in_progress,
            distance_to_destination_m,
        }
    }

    pub fn record_poll(&self, outcome: &str) {
        self.nearby_polls_total.with_label_values(&[outcome]).inc();
    }

    pub fn record_action(&self, action: &str, outcome: &str) {
        self.negotiation_actions_total
            .with_label_values(&[action, outcome])
            .inc();
    }

    pub fn record_trip(&self, outcome: &str) {
        self.trips_total.with_label_values(&[outcome]).inc();
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
