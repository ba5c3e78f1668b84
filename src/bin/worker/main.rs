mod config;
mod echo;
mod registrator;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cfg = config::Config::parse();
    info!(?cfg, "starting worker");

    let worker_addr = normalize_addr(&cfg.worker_addr).parse()?;
    let shutdown = CancellationToken::new();

    let (bound_addr, echo_serving) = echo::bind(
        worker_addr,
        cfg.advertise_addr.clone(),
        cfg.worker_delay,
        shutdown.clone(),
    )?;
    let advertise_addr = cfg.advertise_addr.clone().unwrap_or_else(|| bound_addr.to_string());

    let echo_task = tokio::spawn(echo_serving);
    let registrator_task = tokio::spawn(registrator::run(
        cfg.registry_addr.clone(),
        advertise_addr,
        cfg.registry_interval,
        shutdown.clone(),
    ));

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

    let (echo_result, _) = tokio::join!(echo_task, registrator_task);
    echo_result??;

    info!("worker shut down cleanly");
    Ok(())
}

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
