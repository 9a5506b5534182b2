use anyhow::Result;
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use lm_hub::{Config, Hub};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let cfg = Config::parse();

    if let Some(listen) = cfg.metrics_listen.clone() {
        lm_metrics::install(&lm_metrics::MetricsConfig { listen, namespace: "lm" })?;
    }

    let hub = Hub::spawn(cfg).await?;

    tokio::signal::ctrl_c().await?;
    info!("shutdown");
    hub.shutdown().await;

    Ok(())
}
