use anyhow::Result;
use dispatch_runtime::{build_engine, spawn_offer_sweeper, telemetry, NodeSettings};
use tokio::sync::watch;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init()?;
    let settings = NodeSettings::from_env()?;
    info!(
        offer_window_secs = settings.config.offer_window_secs,
        sweep_interval_ms = settings.config.sweep_interval_ms,
        snapshot = ?settings.snapshot_path,
        "starting dispatch node"
    );

    let engine = build_engine(&settings)?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper =
        spawn_offer_sweeper(engine.clone(), settings.config.sweep_interval(), shutdown_rx);

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    shutdown_tx.send(true)?;
    let expired = sweeper.await?;
    info!(expired, pending_deadline = ?engine.next_deadline(), "dispatch node stopped");
    Ok(())
}
