//! Metrics sink and telemetry callback.
//!
//! The core never owns a global metrics registry; it calls into whatever
//! sink the caller supplied, tagged with the layer digest. `NoopMetrics` is
//! the sink used by tests and by callers that don't want metrics at all.

use std::time::Instant;

/// Counter and latency events the core emits. No method returns anything —
/// callers observe these purely as side effects on the sink they supplied.
pub trait MetricsSink: Send + Sync {
    /// `on-demand-remote-registry-fetch-count`, tagged with the layer digest.
    fn on_demand_fetch(&self, digest: &str, count: u64);

    /// `on-demand-bytes-served`, tagged with the layer digest.
    fn on_demand_bytes_served(&self, digest: &str, bytes: u64);

    /// A latency sample for a named phase (e.g. `init-metadata-store-latency`).
    fn latency(&self, name: &str, started: Instant) {
        let _ = (name, started);
    }
}

/// Sink that discards every event. Used in tests and as the default when the
/// caller doesn't pass telemetry options.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn on_demand_fetch(&self, _digest: &str, _count: u64) {}
    fn on_demand_bytes_served(&self, _digest: &str, _bytes: u64) {}
}

/// Telemetry callback invoked with the start time of a named span (e.g.
/// `init-metadata-store-latency`).
pub trait TelemetryCallback: Send + Sync {
    fn on_span_start(&self, name: &'static str, started: Instant);
}

impl<F> TelemetryCallback for F
where
    F: Fn(&'static str, Instant) + Send + Sync,
{
    fn on_span_start(&self, name: &'static str, started: Instant) {
        self(name, started)
    }
}

#[cfg(feature = "prometheus-metrics")]
pub mod prom {
    //! Production `MetricsSink`, built the way
    //! `ChainSafe-forest`'s `node/db/src/rolling/metrics.rs` builds
    //! label-vector counters: a `lazy_static!` registry of
    //! `GenericCounterVec`s keyed by the layer digest label.
    use super::MetricsSink;
    use lazy_static::lazy_static;
    use prometheus::{core::AtomicU64, GenericCounterVec, Opts};

    lazy_static! {
        static ref ON_DEMAND_FETCH_COUNT: GenericCounterVec<AtomicU64> = {
            let c = GenericCounterVec::new(
                Opts::new(
                    "on_demand_remote_registry_fetch_count",
                    "Count of on-demand span fetches from remote storage",
                ),
                &["digest"],
            )
            .expect("metric options are valid");
            prometheus::default_registry()
                .register(Box::new(c.clone()))
                .expect("metric registers exactly once");
            c
        };
        static ref ON_DEMAND_BYTES_SERVED: GenericCounterVec<AtomicU64> = {
            let c = GenericCounterVec::new(
                Opts::new(
                    "on_demand_bytes_served",
                    "Bytes served to callers via on-demand span fetches",
                ),
                &["digest"],
            )
            .expect("metric options are valid");
            prometheus::default_registry()
                .register(Box::new(c.clone()))
                .expect("metric registers exactly once");
            c
        };
    }

    /// Production metrics sink backed by the process's default Prometheus
    /// registry.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct PrometheusMetrics;

    impl MetricsSink for PrometheusMetrics {
        fn on_demand_fetch(&self, digest: &str, count: u64) {
            ON_DEMAND_FETCH_COUNT.with_label_values(&[digest]).inc_by(count);
        }

        fn on_demand_bytes_served(&self, digest: &str, bytes: u64) {
            ON_DEMAND_BYTES_SERVED.with_label_values(&[digest]).inc_by(bytes);
        }
    }
}

#[cfg(feature = "prometheus-metrics")]
pub use prom::PrometheusMetrics;
