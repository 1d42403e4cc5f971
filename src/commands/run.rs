use anyhow::Result;
use std::env;
use tracing::{Instrument, info, warn};

use crate::metrics;
use crate::stripe_client::StripeConfig;
use crate::web::{PgPool, start_web_server};

#[tracing::instrument(skip_all)]
pub async fn handle_run(interface: String, port: u16, pool: PgPool) -> Result<()> {
    sentry::configure_scope(|scope| {
        scope.set_tag("operation", "run");
    });

    // Metrics must be registered before the exporter takes its first scrape
    info!("Initializing server metrics...");
    metrics::initialize_server_metrics();

    if let Ok(metrics_port) = env::var("METRICS_PORT") {
        let metrics_port: u16 = metrics_port.parse()?;
        info!("Starting metrics server on port {}", metrics_port);
        tokio::spawn(
            async move {
                metrics::start_metrics_server(metrics_port).await;
            }
            .instrument(tracing::info_span!("metrics_server")),
        );
    }

    let stripe_config = match StripeConfig::from_env() {
        Ok(config) => Some(config),
        Err(e) => {
            warn!(
                "Stripe is not configured, checkout and webhooks disabled: {}",
                e
            );
            None
        }
    };

    start_web_server(interface, port, pool, stripe_config).await
}
