use prometheus::{IntCounter, Registry};
use std::sync::Arc;

/// Telemetry is the per-app counter set. Counters are cheap to bump from
/// any thread; scraping or exporting them is the host's concern, through
/// [`Telemetry::registry`].
pub struct Telemetry {
    registry: Registry,
    pub msgs_routed: IntCounter,
    pub msgs_dropped: IntCounter,
    pub results_matched: IntCounter,
    pub results_duplicate_final: IntCounter,
    pub paths_expired: IntCounter,
}

impl Telemetry {
    pub fn new() -> Arc<Self> {
        let registry = Registry::new();

        let counter = |name: &str, help: &str| {
            let counter = IntCounter::new(name, help).expect("static metric name is valid");
            registry
                .register(Box::new(counter.clone()))
                .expect("metric registers once");
            counter
        };

        Arc::new(Self {
            msgs_routed: counter("msgs_routed_total", "Messages routed by engines"),
            msgs_dropped: counter("msgs_dropped_total", "Messages dropped before delivery"),
            results_matched: counter(
                "results_matched_total",
                "Command results matched to a pending path",
            ),
            results_duplicate_final: counter(
                "results_duplicate_final_total",
                "Duplicate final results discarded",
            ),
            paths_expired: counter("paths_expired_total", "Paths expired before a final result"),
            registry,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_counters_register_and_count() {
        let telemetry = Telemetry::new();
        telemetry.msgs_routed.inc();
        telemetry.msgs_routed.inc();
        assert_eq!(telemetry.msgs_routed.get(), 2);
        assert_eq!(telemetry.registry().gather().len(), 5);
    }
}
