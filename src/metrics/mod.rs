/// Prometheus metrics for the delivery subsystem
use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge_vec, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec,
};

lazy_static! {
    /// Signed URLs issued (labels: provider)
    pub static ref SIGNED_URLS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "cdn_signed_urls_total",
        "Total signed URLs issued",
        &["provider"]
    )
    .unwrap();

    /// Failover executions
    pub static ref FAILOVERS_TOTAL: IntCounter = register_int_counter!(
        "cdn_failovers_total",
        "Total primary-provider failovers executed"
    )
    .unwrap();

    /// Health probe failures (labels: provider)
    pub static ref PROBE_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "cdn_probe_failures_total",
        "Total failed health probes",
        &["provider"]
    )
    .unwrap();

    /// Provider liveness as seen by the monitor (labels: provider, 1 = healthy)
    pub static ref PROVIDER_HEALTHY: IntGaugeVec = register_int_gauge_vec!(
        "cdn_provider_healthy",
        "Provider health state (1 healthy, 0 unhealthy)",
        &["provider"]
    )
    .unwrap();

    /// Health probe round-trip time (labels: provider)
    pub static ref PROBE_DURATION_MS: HistogramVec = register_histogram_vec!(
        "cdn_probe_duration_ms",
        "Health probe round-trip time in milliseconds",
        &["provider"],
        vec![10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0]
    )
    .unwrap();

    /// Key rotations completed (labels: provider)
    pub static ref KEY_ROTATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "cdn_key_rotations_total",
        "Total signing key rotations completed",
        &["provider"]
    )
    .unwrap();

    /// Alerts dispatched to sinks (labels: alert_type)
    pub static ref ALERTS_DISPATCHED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "cdn_alerts_dispatched_total",
        "Total alerts dispatched after cooldown filtering",
        &["alert_type"]
    )
    .unwrap();

    /// Alerts suppressed by cooldown (labels: alert_type)
    pub static ref ALERTS_SUPPRESSED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "cdn_alerts_suppressed_total",
        "Total alerts suppressed inside a cooldown window",
        &["alert_type"]
    )
    .unwrap();

    /// Sink dispatch failures; never retried inline
    pub static ref ALERT_DISPATCH_FAILURES_TOTAL: IntCounter = register_int_counter!(
        "cdn_alert_dispatch_failures_total",
        "Total failed alert sink dispatches"
    )
    .unwrap();
}
