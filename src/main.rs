use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod db;
mod dispatch;
mod error;
mod init;
mod policy;
mod worker;

use config::Config;
use worker::DeliveryWorker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "notification_relay=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Starting notification relay");

    let pool = init::init_db(&config).await?;
    let dispatchers = init::build_dispatchers(&config).await;

    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    let delivery_worker = DeliveryWorker::new(pool.clone(), config.delivery.clone(), dispatchers);
    let worker_handle = worker::spawn_delivery_worker(delivery_worker, shutdown_tx.clone());

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received, stopping worker");

    // Stop claiming new batches; in-flight dispatches finish inside the
    // current tick before the loop observes the broadcast.
    let _ = shutdown_tx.send(());
    if let Err(e) = worker_handle.await {
        tracing::warn!("Delivery worker join error: {:?}", e);
    }

    pool.close().await;
    tracing::info!("Notification relay stopped");

    Ok(())
}
