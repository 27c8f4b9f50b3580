use prometheus::{
    Encoder, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub assignment_events_total: IntCounterVec,
    pub accept_attempts_total: IntCounterVec,
    pub sweep_latency_seconds: HistogramVec,
    pub online_drivers: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let assignment_events_total = IntCounterVec::new(
            Opts::new(
                "assignment_events_total",
                "Assignment audit events by action",
            ),
            &["action"],
        )
        .expect("valid assignment_events_total metric");

        let accept_attempts_total = IntCounterVec::new(
            Opts::new("accept_attempts_total", "Driver accept attempts by outcome"),
            &["outcome"],
        )
        .expect("valid accept_attempts_total metric");

        let sweep_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "sweep_latency_seconds",
                "Latency of one assignment timeout sweep in seconds",
            ),
            &["outcome"],
        )
        .expect("valid sweep_latency_seconds metric");

        let online_drivers = IntGauge::new(
            "online_drivers",
            "Drivers currently in the presence registry",
        )
        .expect("valid online_drivers metric");

        registry
            .register(Box::new(assignment_events_total.clone()))
            .expect("register assignment_events_total");
        registry
            .register(Box::new(accept_attempts_total.clone()))
            .expect("register accept_attempts_total");
        registry
            .register(Box::new(sweep_latency_seconds.clone()))
            .expect("register sweep_latency_seconds");
        registry
            .register(Box::new(online_drivers.clone()))
            .expect("register online_drivers");

        Self {
            registry,
            assignment_events_total,
            accept_attempts_total,
            sweep_latency_seconds,
            online_drivers,
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
