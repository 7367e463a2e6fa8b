use std::sync::Arc;
use std::time::Duration;

use fanout_events::EventBus;
use fanout_pipeline::{bootstrap, reconciler, Dispatcher};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fanout_worker=debug,fanout_pipeline=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let bus = Arc::new(EventBus::default());
    let runtime = bootstrap::from_env(bus)
        .await
        .expect("Failed to assemble the generation pipeline");
    let ctx = runtime.context;

    // The bus is per-process; jobs created elsewhere reach this worker
    // through the reconciler's redelivery sweep.
    if runtime.pool.is_none() {
        tracing::warn!("Worker running on the in-memory store; it only sees its own tasks");
    }

    let cancel = CancellationToken::new();
    let dispatcher = tokio::spawn(Dispatcher::new(ctx.clone()).run(cancel.clone()));
    let reconciler = tokio::spawn(reconciler::run(ctx, cancel.clone()));
    tracing::info!("Worker started");

    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl-C handler");
    tracing::info!("Shutdown requested");

    cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(30), dispatcher).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), reconciler).await;
    tracing::info!("Worker stopped");
}
