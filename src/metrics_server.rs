//! Prometheus metrics exporter bootstrap

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Install the global Prometheus recorder with a scrape listener.
/// Must be called from within the tokio runtime.
pub fn install(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Suffix("_ms".to_string()),
            &[1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0],
        )
        .context("failed to set histogram buckets")?
        .install()
        .context("failed to install Prometheus recorder")?;
    info!("Metrics exporter listening on {}", addr);
    Ok(())
}
