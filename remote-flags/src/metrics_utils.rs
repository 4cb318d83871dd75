use std::time::Instant;

use axum::{body::Body, extract::MatchedPath, http::Request, middleware::Next, response::IntoResponse};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub const FLAG_EVALUATIONS_COUNTER: &str = "flag_evaluations_total";
pub const CASCADE_ENVIRONMENTS_COUNTER: &str = "flag_cascade_environments_total";
pub const CASCADE_FAILURES_COUNTER: &str = "flag_cascade_failures_total";
pub const PROJECT_LINK_FAILURES_COUNTER: &str = "environment_project_link_failures_total";

/// Installs the global Prometheus recorder. Only call this once per process.
pub fn setup_metrics_recorder() -> PrometheusHandle {
    const EXPONENTIAL_SECONDS: &[f64] = &[
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ];

    PrometheusBuilder::new()
        .set_buckets(EXPONENTIAL_SECONDS)
        .expect("failed to set histogram buckets")
        .install_recorder()
        .expect("failed to install metrics recorder")
}

/// Middleware to record some common HTTP metrics
pub async fn track_metrics(req: Request<Body>, next: Next) -> impl IntoResponse {
    let start = Instant::now();

    // Label by route template, so environment ids don't blow up cardinality.
    let path = if let Some(matched_path) = req.extensions().get::<MatchedPath>() {
        matched_path.as_str().to_owned()
    } else {
        req.uri().path().to_owned()
    };

    let method = req.method().clone();

    let response = next.run(req).await;

    let latency = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    let labels = [
        ("method", method.to_string()),
        ("path", path),
        ("status", status),
    ];

    metrics::counter!("http_requests_total", &labels).increment(1);
    metrics::histogram!("http_requests_duration_seconds", &labels).record(latency);

    response
}
