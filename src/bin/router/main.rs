mod config;
mod registry;
mod router_endpoint;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use muster::pool::{reaper_tick, Pool};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cfg = config::Config::parse();
    info!(?cfg, "starting router");

    let registry_addr = normalize_addr(&cfg.registry_addr).parse()?;
    let http_addr = normalize_addr(&cfg.http_addr).parse()?;
    let pool = Arc::new(Pool::new(cfg.max_client_no_notif, cfg.slow_threshold));
    let shutdown = CancellationToken::new();

    let registry_task = tokio::spawn(registry::serve(registry_addr, pool.clone(), shutdown.clone()));
    let router_task = tokio::spawn(router_endpoint::serve(http_addr, pool.clone(), shutdown.clone()));
    let reaper_task = tokio::spawn(reaper_tick(pool.clone(), shutdown.clone()));

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = wait_for_shutdown_signal().await {
                error!(error = %e, "failed to install signal handler");
            }
            info!("shutdown signal received");
            shutdown.cancel();
        }
    });

    let result = tokio::time::timeout(SHUTDOWN_GRACE + Duration::from_secs(1), async {
        let (registry_result, router_result, _) =
            tokio::join!(registry_task, router_task, reaper_task);
        registry_result??;
        router_result??;
        Ok::<(), anyhow::Error>(())
    })
    .await;

    match result {
        Ok(Ok(())) => {
            info!("router shut down cleanly");
            Ok(())
        }
        Ok(Err(e)) => {
            error!(error = %e, "router task failed");
            Err(e)
        }
        Err(_) => {
            error!("shutdown grace period exceeded, aborting");
            anyhow::bail!("shutdown deadline exceeded")
        }
    }
}

/// Turns the Go-style `":8080"` ("listen on all interfaces") into a
/// `SocketAddr`-parseable `"0.0.0.0:8080"`.
fn normalize_addr(raw: &str) -> String {
    if let Some(port) = raw.strip_prefix(':') {
        format!("0.0.0.0:{port}")
    } else {
        raw.to_string()
    }
}

async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }
        Ok(())
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        Ok(())
    }
}
