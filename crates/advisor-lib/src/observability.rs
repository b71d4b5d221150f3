//! Observability for the advisor
//!
//! Prometheus metrics covering the update cycle. The agent binary exposes
//! them through its `/metrics` endpoint.

use prometheus::{
    register_histogram, register_int_counter, register_int_gauge, Histogram, IntCounter, IntGauge,
};
use std::sync::OnceLock;

/// Histogram buckets for cycle latency (in seconds)
const CYCLE_LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<AdvisorMetricsInner> = OnceLock::new();

struct AdvisorMetricsInner {
    update_latency_seconds: Histogram,
    update_cycles: IntCounter,
    update_skips: IntCounter,
    assignment_errors: IntCounter,
    assembly_errors: IntCounter,
    plans_sent: IntCounter,
    regions: IntGauge,
    headroom_cpus: IntGauge,
}

impl AdvisorMetricsInner {
    fn new() -> Self {
        Self {
            update_latency_seconds: register_histogram!(
                "cpu_advisor_update_latency_seconds",
                "Time spent running one advisor update cycle",
                CYCLE_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register update_latency_seconds"),

            update_cycles: register_int_counter!(
                "cpu_advisor_update_cycles_total",
                "Update cycles triggered by the CPU server"
            )
            .expect("Failed to register update_cycles_total"),

            update_skips: register_int_counter!(
                "cpu_advisor_update_skips_total",
                "Update cycles skipped because the reserve pool was absent"
            )
            .expect("Failed to register update_skips_total"),

            assignment_errors: register_int_counter!(
                "cpu_advisor_assignment_errors_total",
                "Cycles whose container assignment reported errors"
            )
            .expect("Failed to register assignment_errors_total"),

            assembly_errors: register_int_counter!(
                "cpu_advisor_assembly_errors_total",
                "Cycles whose provision assembly failed"
            )
            .expect("Failed to register assembly_errors_total"),

            plans_sent: register_int_counter!(
                "cpu_advisor_plans_sent_total",
                "Provision plans delivered to the CPU server"
            )
            .expect("Failed to register plans_sent_total"),

            regions: register_int_gauge!(
                "cpu_advisor_regions",
                "QoS regions in the advisor's region map"
            )
            .expect("Failed to register regions"),

            headroom_cpus: register_int_gauge!(
                "cpu_advisor_headroom_cpus",
                "Node reclaim headroom as of the last successful query"
            )
            .expect("Failed to register headroom_cpus"),
        }
    }
}

/// Lightweight handle to the global advisor metrics.
///
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct AdvisorMetrics {
    _private: (),
}

impl Default for AdvisorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AdvisorMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(AdvisorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &AdvisorMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn observe_update_latency(&self, duration_secs: f64) {
        self.inner().update_latency_seconds.observe(duration_secs);
    }

    pub fn inc_update_cycles(&self) {
        self.inner().update_cycles.inc();
    }

    pub fn inc_update_skips(&self) {
        self.inner().update_skips.inc();
    }

    pub fn inc_assignment_errors(&self) {
        self.inner().assignment_errors.inc();
    }

    pub fn inc_assembly_errors(&self) {
        self.inner().assembly_errors.inc();
    }

    pub fn inc_plans_sent(&self) {
        self.inner().plans_sent.inc();
    }

    pub fn set_regions(&self, count: i64) {
        self.inner().regions.set(count);
    }

    pub fn set_headroom_cpus(&self, cpus: i64) {
        self.inner().headroom_cpus.set(cpus);
    }
}
