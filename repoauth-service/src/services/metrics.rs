//! Prometheus metrics for repoauth-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, HistogramVec, IntCounterVec, TextEncoder,
};

/// RPC counter by method and outcome (`true`, `false`, `invalid_argument`,
/// `unavailable`, `internal`, `shutting_down`).
pub static GRPC_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "repoauth_rpc_requests_total",
        "Total number of RPC requests",
        &["method", "outcome"]
    )
    .expect("Failed to register repoauth_rpc_requests_total")
});

/// RPC duration histogram by method. Buckets reach past one second because
/// credential checks include an Argon2 verification.
pub static GRPC_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "repoauth_rpc_request_duration_seconds",
        "RPC request duration in seconds",
        &["method"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .expect("Failed to register repoauth_rpc_request_duration_seconds")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "repoauth_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register repoauth_db_query_duration_seconds")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&GRPC_REQUESTS_TOTAL);
    Lazy::force(&GRPC_REQUEST_DURATION);
    Lazy::force(&DB_QUERY_DURATION);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    match encoder.encode_to_string(&metric_families) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            format!("# Failed to encode metrics: {}\n", e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_metrics_are_exported() {
        init_metrics();
        GRPC_REQUESTS_TOTAL
            .with_label_values(&["CheckCredentials", "false"])
            .inc();

        let text = get_metrics();
        assert!(text.contains("repoauth_rpc_requests_total"));
    }
}
