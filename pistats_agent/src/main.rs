use std::net::SocketAddr;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use pistats_agent::broadcast::spawn_broadcast_loop;
use pistats_agent::config::Config;
use pistats_agent::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    let addr = SocketAddr::new(config.host, config.port);
    let state = AppState::new(config);

    // No degraded mode without a listening socket: bind failure is fatal.
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "stats broadcaster listening");

    let cancel = CancellationToken::new();

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "error waiting for shutdown signal");
        }
        info!("shutdown signal received");
        signal_cancel.cancel();
    });

    let tick_handle = spawn_broadcast_loop(state.clone(), cancel.clone());

    let shutdown = cancel.clone();
    axum::serve(listener, pistats_agent::router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("server error")?;

    cancel.cancel();
    let _ = tick_handle.await;
    info!("stats broadcaster stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = sigint.recv() => info!("received SIGINT"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("received Ctrl+C");
    }

    Ok(())
}
