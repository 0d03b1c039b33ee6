use std::net::SocketAddr;

use anyhow::Result;
use bitfreeze::config::Config;
use bitfreeze::notify::run_notifier;
use bitfreeze::scheduler::run_daily_accrual;
use bitfreeze::{admin_links, init_notifier, init_router, init_state, init_store};
use tokio::net::TcpListener;
use tokio::signal::ctrl_c;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    let port = config.server_port;

    let store = init_store(&config).await?;
    let notifier = init_notifier(&config);
    let links = admin_links(&config);
    let (state, events) = init_state(config, store)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = tokio::spawn(run_daily_accrual(state.bank.clone(), shutdown_rx));
    let notifier = tokio::spawn(run_notifier(events, notifier, links));

    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let listener = TcpListener::bind(addr).await?;
    let app = init_router(state);

    info!("Listening on {addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The router held the last bank, and with it the last event sender, so
    // the notifier drains what is queued and stops.
    let _ = shutdown_tx.send(true);
    let _ = scheduler.await;
    let _ = notifier.await;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        ctrl_c().await.expect("Failed to install Ctrl+C handler");
        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
        info!("Received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
