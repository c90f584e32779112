//! Prometheus metrics for the REST server
//!
//! Defines metrics for:
//! - Request counts by method and status
//! - Request latency
//! - Object operations by operation and response status
//! - Object bytes transferred by direction

use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder,
};

lazy_static! {
    /// Registry for all metrics
    pub static ref REGISTRY: Registry = Registry::new();

    /// HTTP request counter by method and status
    pub static ref HTTP_REQUESTS: IntCounterVec = IntCounterVec::new(
        Opts::new("rest_server_http_requests_total", "Total HTTP requests"),
        &["method", "status"]
    )
    .expect("Failed to create HTTP_REQUESTS metric");

    /// HTTP request latency histogram
    pub static ref HTTP_REQUEST_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "rest_server_http_request_duration_seconds",
            "HTTP request duration in seconds"
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0])
    )
    .expect("Failed to create HTTP_REQUEST_DURATION metric");

    /// Object operation counter by operation and response status
    pub static ref OBJECT_OPERATIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("rest_server_object_operations_total", "Total object operations"),
        &["operation", "status"]
    )
    .expect("Failed to create OBJECT_OPERATIONS metric");

    /// Object payload bytes, "read" or "written"
    pub static ref OBJECT_BYTES: IntCounterVec = IntCounterVec::new(
        Opts::new("rest_server_object_bytes_total", "Object payload bytes transferred"),
        &["direction"]
    )
    .expect("Failed to create OBJECT_BYTES metric");
}

/// Register all metrics with the global registry
pub fn init_metrics() -> Result<(), prometheus::Error> {
    REGISTRY.register(Box::new(HTTP_REQUESTS.clone()))?;
    REGISTRY.register(Box::new(HTTP_REQUEST_DURATION.clone()))?;
    REGISTRY.register(Box::new(OBJECT_OPERATIONS.clone()))?;
    REGISTRY.register(Box::new(OBJECT_BYTES.clone()))?;
    Ok(())
}

/// Text exposition of the registry
pub fn render() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&REGISTRY.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
