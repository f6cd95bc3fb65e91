//! Prometheus metrics for the gateway.
//!
//! # Metrics Exposed
//!
//! - `graphql_requests_total` - GraphQL requests by operation type
//! - `graphql_request_duration_seconds` - request latency histogram
//! - `graphql_errors_total` - errors returned to clients, by error code
//! - `grpc_backend_requests_total` - upstream RPCs by service and method
//! - `grpc_backend_duration_seconds` - upstream RPC latency histogram
//! - `grpc_backend_errors_total` - failed upstream RPCs by status code
//!
//! Everything is registered in the default Prometheus registry the first
//! time [`GatewayMetrics::global`] is called.

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec, IntCounterVec,
    TextEncoder,
};
use std::time::Instant;

/// Default histogram buckets for latency measurements (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

static METRICS: Lazy<GatewayMetrics> = Lazy::new(GatewayMetrics::register);

/// Counters and histograms for GraphQL requests and upstream RPCs.
#[derive(Clone)]
pub struct GatewayMetrics {
    graphql_requests: IntCounterVec,
    graphql_duration: HistogramVec,
    graphql_errors: IntCounterVec,
    grpc_requests: IntCounterVec,
    grpc_duration: HistogramVec,
    grpc_errors: IntCounterVec,
}

impl GatewayMetrics {
    /// Registration only fails on duplicate names, which `METRICS` rules out.
    fn register() -> Self {
        Self {
            graphql_requests: register_int_counter_vec!(
                "graphql_requests_total",
                "Total number of GraphQL requests",
                &["operation"]
            )
            .expect("metric can be created"),

            graphql_duration: register_histogram_vec!(
                "graphql_request_duration_seconds",
                "GraphQL request duration in seconds",
                &["operation"],
                LATENCY_BUCKETS.to_vec()
            )
            .expect("metric can be created"),

            graphql_errors: register_int_counter_vec!(
                "graphql_errors_total",
                "Total number of GraphQL errors returned",
                &["code"]
            )
            .expect("metric can be created"),

            grpc_requests: register_int_counter_vec!(
                "grpc_backend_requests_total",
                "Total number of gRPC backend requests",
                &["service", "method"]
            )
            .expect("metric can be created"),

            grpc_duration: register_histogram_vec!(
                "grpc_backend_duration_seconds",
                "gRPC backend request duration in seconds",
                &["service", "method"],
                LATENCY_BUCKETS.to_vec()
            )
            .expect("metric can be created"),

            grpc_errors: register_int_counter_vec!(
                "grpc_backend_errors_total",
                "Total number of gRPC backend errors",
                &["service", "method", "code"]
            )
            .expect("metric can be created"),
        }
    }

    /// Get the global metrics instance
    pub fn global() -> &'static Self {
        &METRICS
    }

    /// Record a GraphQL error by its `extensions.code`.
    pub fn record_graphql_error(&self, code: &str) {
        self.graphql_errors.with_label_values(&[code]).inc();
    }

    pub fn graphql_requests(&self, operation: &str) -> u64 {
        self.graphql_requests.with_label_values(&[operation]).get()
    }

    pub fn graphql_errors(&self, code: &str) -> u64 {
        self.graphql_errors.with_label_values(&[code]).get()
    }

    pub fn grpc_requests(&self, service: &str, method: &str) -> u64 {
        self.grpc_requests.with_label_values(&[service, method]).get()
    }

    pub fn grpc_errors(&self, service: &str, method: &str, code: &str) -> u64 {
        self.grpc_errors
            .with_label_values(&[service, method, code])
            .get()
    }

    /// Render all metrics in Prometheus text format
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&prometheus::gather(), &mut buffer) {
            tracing::error!(error = %e, "Failed to encode metrics");
            return String::new();
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

/// Records a GraphQL request and, when dropped, its duration.
pub struct RequestTimer {
    start: Instant,
    operation: &'static str,
}

impl RequestTimer {
    pub fn new(operation: &'static str) -> Self {
        GatewayMetrics::global()
            .graphql_requests
            .with_label_values(&[operation])
            .inc();
        Self {
            start: Instant::now(),
            operation,
        }
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        GatewayMetrics::global()
            .graphql_duration
            .with_label_values(&[self.operation])
            .observe(self.start.elapsed().as_secs_f64());
    }
}

/// Timer for gRPC backend calls
pub struct GrpcTimer {
    start: Instant,
    service: String,
    method: String,
}

impl GrpcTimer {
    pub fn new(service: impl Into<String>, method: impl Into<String>) -> Self {
        let service = service.into();
        let method = method.into();
        GatewayMetrics::global()
            .grpc_requests
            .with_label_values(&[&service, &method])
            .inc();
        Self {
            start: Instant::now(),
            service,
            method,
        }
    }

    /// Count a failed call under its status code.
    pub fn record_error(&self, code: tonic::Code) {
        let code = format!("{code:?}");
        GatewayMetrics::global()
            .grpc_errors
            .with_label_values(&[&self.service, &self.method, &code])
            .inc();
    }
}

impl Drop for GrpcTimer {
    fn drop(&mut self) {
        GatewayMetrics::global()
            .grpc_duration
            .with_label_values(&[&self.service, &self.method])
            .observe(self.start.elapsed().as_secs_f64());
    }
}
