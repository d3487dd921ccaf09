pub mod api;
pub mod commands;
pub mod config;
pub mod context;
pub mod db;
pub mod models;
pub mod proxy;
pub mod sync;

#[cfg(test)]
mod test_support;

use anyhow::Context as _;
use log::info;

use crate::config::AppConfig;
use crate::context::AppContext;

/// Worker entry point: build the context, run the fetch loop until Ctrl-C
pub async fn run() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = AppConfig::from_env().context("Failed to load configuration")?;
    info!("Starting asset aggregator v{}", env!("CARGO_PKG_VERSION"));

    let ctx = AppContext::initialize(config)
        .await
        .context("Worker initialization failed")?;

    let scheduler = ctx.scheduler();
    scheduler.start().await;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    scheduler.stop().await;
    drop(ctx);

    info!("Asset aggregator stopped");
    Ok(())
}
