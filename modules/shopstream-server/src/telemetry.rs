//! Prometheus recorder and HTTP request metrics.

use std::time::{Duration, Instant};

use axum::{
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use shopstream_aggregates::recommendations::CACHE_REQUESTS;
use shopstream_events::instrument::{MESSAGES_CONSUMED, MESSAGE_PROCESSING_SECONDS};
use shopstream_events::publisher::MESSAGES_PUBLISHED;
use tokio::task::JoinHandle;

pub const HTTP_REQUESTS: &str = "shopstream_http_requests_total";
pub const HTTP_REQUEST_SECONDS: &str = "shopstream_http_request_duration_seconds";

/// Install the process-wide recorder. Call once, from `main`.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe();
    Ok(handle)
}

fn describe() {
    metrics::describe_counter!(HTTP_REQUESTS, "HTTP requests by method, route and status");
    metrics::describe_histogram!(HTTP_REQUEST_SECONDS, "HTTP request duration");
    metrics::describe_counter!(MESSAGES_CONSUMED, "Consumed messages by handler outcome");
    metrics::describe_histogram!(MESSAGE_PROCESSING_SECONDS, "Handler duration per message");
    metrics::describe_counter!(MESSAGES_PUBLISHED, "Published messages by delivery outcome");
    metrics::describe_counter!(CACHE_REQUESTS, "Response cache operations by outcome");
}

/// Histograms are buffered until upkeep drains them.
pub fn spawn_upkeep(handle: PrometheusHandle) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(5));
        loop {
            ticker.tick().await;
            handle.run_upkeep();
        }
    })
}

/// Counts and times every request, labelled by the matched route so ids
/// in paths do not explode label cardinality.
pub async fn track_http(request: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(request).await;

    metrics::counter!(
        HTTP_REQUESTS,
        "method" => method.clone(),
        "path" => path.clone(),
        "status" => response.status().as_u16().to_string(),
    )
    .increment(1);
    metrics::histogram!(HTTP_REQUEST_SECONDS, "method" => method, "path" => path)
        .record(started.elapsed().as_secs_f64());

    response
}
