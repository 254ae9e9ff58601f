//! Prometheus metrics

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;

/// Install the Prometheus exporter with an HTTP scrape endpoint.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(listen: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(listen)
        .install()?;

    describe_gauge!(
        "callcore_active_sessions",
        "Number of call sessions currently tracked"
    );
    describe_counter!(
        "callcore_sessions_total",
        "Total number of call sessions created"
    );
    describe_counter!(
        "callcore_conferences_total",
        "Total number of conferences created"
    );
    describe_counter!(
        "callcore_dtmf_retries_total",
        "Total number of DTMF bursts scheduled for retry"
    );

    Ok(())
}

/// Record a new call session
pub fn record_session_created(incoming: bool) {
    let direction = if incoming { "incoming" } else { "outgoing" };
    counter!("callcore_sessions_total", "direction" => direction).increment(1);
}

/// Update the number of live call sessions
pub fn update_active_sessions(count: usize) {
    gauge!("callcore_active_sessions").set(count as f64);
}

pub fn record_conference_created() {
    counter!("callcore_conferences_total").increment(1);
}

pub fn record_dtmf_retry() {
    counter!("callcore_dtmf_retries_total").increment(1);
}
