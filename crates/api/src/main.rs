use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use fanout_api::config::ServerConfig;
use fanout_api::router::build_app_router;
use fanout_api::state::AppState;
use fanout_events::EventBus;
use fanout_pipeline::{bootstrap, reconciler, Dispatcher};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fanout_api=debug,fanout_pipeline=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Pipeline ---
    let bus = Arc::new(EventBus::default());
    let runtime = bootstrap::from_env(bus)
        .await
        .expect("Failed to assemble the generation pipeline");

    // --- Background workers ---
    let cancel = CancellationToken::new();
    let workers = if config.embed_worker {
        let dispatcher = tokio::spawn(Dispatcher::new(runtime.context.clone()).run(cancel.clone()));
        let reconciler = tokio::spawn(reconciler::run(runtime.context.clone(), cancel.clone()));
        tracing::info!("Embedded dispatcher and reconciler started");
        vec![dispatcher, reconciler]
    } else {
        tracing::info!("EMBED_WORKER disabled; jobs run in a separate worker process");
        Vec::new()
    };

    // --- Router ---
    let state = AppState {
        pipeline: runtime.context,
        pool: runtime.pool,
        config: Arc::new(config.clone()),
    };
    let app = build_app_router(state);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, draining workers");
    cancel.cancel();
    let grace = Duration::from_secs(config.shutdown_timeout_secs);
    for handle in workers {
        let _ = tokio::time::timeout(grace, handle).await;
    }
    tracing::info!("Graceful shutdown complete");
}

/// Wait for SIGINT or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
