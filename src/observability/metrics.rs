use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub assignments_total: IntCounterVec,
    pub assignment_latency_seconds: HistogramVec,
    pub responses_total: IntCounterVec,
    pub reassignments_total: IntCounterVec,
    pub status_updates_total: IntCounterVec,
    pub notifications_total: IntCounterVec,
    pub couriers_available: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let assignments_total = IntCounterVec::new(
            Opts::new("assignments_total", "Automatic assignments by outcome"),
            &["outcome"],
        )
        .expect("valid assignments_total metric");

        let assignment_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "assignment_latency_seconds",
                "Latency of automatic assignment in seconds",
            ),
            &["outcome"],
        )
        .expect("valid assignment_latency_seconds metric");

        let responses_total = IntCounterVec::new(
            Opts::new("responses_total", "Courier responses to assignments by action"),
            &["action"],
        )
        .expect("valid responses_total metric");

        let reassignments_total = IntCounterVec::new(
            Opts::new("reassignments_total", "Reassignment attempts after a decline by outcome"),
            &["outcome"],
        )
        .expect("valid reassignments_total metric");

        let status_updates_total = IntCounterVec::new(
            Opts::new("status_updates_total", "Courier driven delivery status changes"),
            &["status"],
        )
        .expect("valid status_updates_total metric");

        let notifications_total = IntCounterVec::new(
            Opts::new("notifications_total", "Delivered notifications by outcome"),
            &["outcome"],
        )
        .expect("valid notifications_total metric");

        let couriers_available =
            IntGauge::new("couriers_available", "Couriers currently available for assignment")
                .expect("valid couriers_available metric");

        registry
            .register(Box::new(assignments_total.clone()))
            .expect("register assignments_total");
        registry
            .register(Box::new(assignment_latency_seconds.clone()))
            .expect("register assignment_latency_seconds");
        registry
            .register(Box::new(responses_total.clone()))
            .expect("register responses_total");
        registry
            .register(Box::new(reassignments_total.clone()))
            .expect("register reassignments_total");
        registry
            .register(Box::new(status_updates_total.clone()))
            .expect("register status_updates_total");
        registry
            .register(Box::new(notifications_total.clone()))
            .expect("register notifications_total");
        registry
            .register(Box::new(couriers_available.clone()))
            .expect("register couriers_available");

        Self {
            registry,
            assignments_total,
            assignment_latency_seconds,
            responses_total,
            reassignments_total,
            status_updates_total,
            notifications_total,
            couriers_available,
        }
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
