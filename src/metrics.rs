use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use tracing::{error, info};

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize Prometheus metrics exporter
/// Returns a handle that can be used to render metrics for scraping
pub fn init_metrics() -> PrometheusHandle {
    PrometheusBuilder::new()
        // Buckets: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s, 10s
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full(
                "stripe.webhook.processing_ms".to_string(),
            ),
            &[1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0],
        )
        .expect("failed to set buckets for stripe.webhook.processing_ms")
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Initialize server metrics to zero so they appear in dashboards before
/// the first event. Must run before the metrics server accepts scrapes.
pub fn initialize_server_metrics() {
    metrics::counter!("stripe.webhook.received").absolute(0);
    metrics::counter!("stripe.webhook.replayed").absolute(0);
    metrics::counter!("stripe.webhook.failed").absolute(0);
    metrics::counter!("stripe.webhook.signature_invalid").absolute(0);
    metrics::counter!("stripe.api.errors").absolute(0);
    metrics::counter!("stripe.subscription.synced").absolute(0);

    metrics::counter!("reconcile.confirmed").absolute(0);
    metrics::counter!("reconcile.replayed").absolute(0);
    metrics::counter!("reconcile.verify.unpaid").absolute(0);

    metrics::counter!("entitlements.tickets.issued").absolute(0);
    metrics::counter!("entitlements.memberships.activated").absolute(0);
    metrics::counter!("entitlements.gift_codes.issued").absolute(0);
}

/// Serve /metrics on a dedicated port for Prometheus scraping
pub async fn start_metrics_server(port: u16) {
    let handle = init_metrics();
    if METRICS_HANDLE.set(handle).is_err() {
        error!("Metrics handle already initialized");
        return;
    }

    let app = Router::new().route(
        "/metrics",
        get(|| async {
            match METRICS_HANDLE.get() {
                Some(handle) => handle.render(),
                None => String::new(),
            }
        }),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting metrics server on http://{}/metrics", addr);

    match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => {
            if let Err(e) = axum::serve(listener, app).await {
                error!("Metrics server error: {}", e);
            }
        }
        Err(e) => {
            error!("Failed to bind metrics server on {}: {}", addr, e);
        }
    }
}
