//! # Service Metrics
//!
//! Prometheus latency histograms for HTTP requests and store operations,
//! registered in the default registry and served at `/__metrics__`.
//!
//! ## Metrics Exported
//!
//! - `iprepd_http_request_duration_seconds` - Request latency by method, route and status
//! - `iprepd_store_operation_duration_seconds` - Store call latency by operation and result

use prometheus::{Encoder, HistogramVec, TextEncoder, register_histogram_vec};
use std::sync::LazyLock;
use std::time::Duration;

/// Route label for requests that matched no route
pub const UNMATCHED_ROUTE: &str = "unmatched";

/// HTTP request latency, labeled by method, matched route and status code
pub static HTTP_REQUEST_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "iprepd_http_request_duration_seconds",
        "HTTP request latency in seconds",
        &["method", "route", "status"]
    )
    .expect("Failed to create HTTP_REQUEST_DURATION metric")
});

/// Store call latency, labeled by operation and outcome
pub static STORE_OPERATION_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "iprepd_store_operation_duration_seconds",
        "Store operation latency in seconds",
        &["operation", "result"],
        vec![0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to create STORE_OPERATION_DURATION metric")
});

/// Record a completed HTTP request
pub fn record_request(method: &str, route: &str, status: u16, elapsed: Duration) {
    HTTP_REQUEST_DURATION
        .with_label_values(&[method, route, &status.to_string()])
        .observe(elapsed.as_secs_f64());
}

/// Record a store call
pub fn record_store_operation(operation: &str, ok: bool, elapsed: Duration) {
    STORE_OPERATION_DURATION
        .with_label_values(&[operation, if ok { "ok" } else { "error" }])
        .observe(elapsed.as_secs_f64());
}

/// Text exposition of every registered metric
pub fn render() -> Result<String, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
