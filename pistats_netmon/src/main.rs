use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use pistats_netmon::config::{Config, AGENT_BIN_NAME};
use pistats_netmon::probe::{Connectivity, ConnectivityTracker, Prober};
use pistats_netmon::supervise::{kill_stale_agents, AgentProcess, Supervisor};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    info!(
        iface = %config.iface,
        poll_secs = config.poll_interval.as_secs(),
        agent = %config.agent_bin.display(),
        "network monitor starting"
    );

    // Reconciliation: a broadcaster we did not start would race ours
    // for the port. Kill-and-restart, never adopt.
    let agent_name = config
        .agent_bin
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| AGENT_BIN_NAME.to_string());
    let stale = kill_stale_agents(&agent_name);
    if stale > 0 {
        info!(count = stale, "removed stale broadcaster instances");
    }

    let mut prober = Prober::new(
        config.iface.clone(),
        config.probe_addr,
        config.probe_timeout,
    );
    let mut tracker = ConnectivityTracker::new();
    let mut supervisor = Supervisor::new(
        AgentProcess::new(config.agent_bin.clone()),
        config.grace,
        config.backoff,
    );

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "error waiting for shutdown signal");
        }
        info!("shutdown signal received");
        signal_cancel.cancel();
    });

    let mut poll = interval(config.poll_interval);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut was_online = false;

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            _ = poll.tick() => {
                // probe does blocking socket work; keep the worker thread usable
                let result = tokio::task::block_in_place(|| prober.probe());
                let state = tracker.observe(result);
                let online = state.is_online();

                if online != was_online {
                    match state {
                        Connectivity::Online(ip) => info!(%ip, "network is up"),
                        Connectivity::Offline => info!("network is down"),
                    }
                    was_online = online;
                }

                supervisor.reconcile(online).await;
            }
        }
    }

    // drain: never leave an orphaned broadcaster behind
    supervisor.ensure_stopped().await;
    info!("network monitor stopped");
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
