//! Prometheus metrics for the hub.
//!
//! Metric names live under `{namespace}_hub_*` and `{namespace}_media_*`.
//! Install once at startup; the exporter serves the scrape endpoint itself.

pub mod hub;
pub mod media;

pub use hub::HubMetrics;
pub use media::MediaMetricsImpl;

use std::net::SocketAddr;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::OnceCell;
use tracing::info;

#[derive(Clone, Debug)]
pub struct MetricsConfig {
    /// Scrape endpoint, e.g. `127.0.0.1:9100`.
    pub listen: String,
    pub namespace: &'static str,
}

static INSTALLED: OnceCell<()> = OnceCell::new();

/// Install the global recorder and start the scrape listener.
/// Idempotent so tests can spin up multiple hubs in one process.
pub fn install(cfg: &MetricsConfig) -> Result<()> {
    let addr: SocketAddr = cfg.listen.parse().context("metrics listen address")?;
    let mut result = Ok(());
    INSTALLED.get_or_init(|| {
        result = PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("install prometheus exporter");
        if result.is_ok() {
            info!(%addr, "metrics listening");
        }
    });
    result
}
