//! tollgate: message gateway binary.
//!
//! `serve` runs a gate speaking the demo protocol with its session service;
//! `ping` is a TCP client for it.

use clap::Parser;
use tokio_util::sync::CancellationToken;

use tollgate_gate::{Gate, lifecycle};

mod cli;
mod ping;
mod protocol;
mod service;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();
    let config = cli::load_config(args.config.as_ref())?;

    match args.command {
        cli::Command::Serve(opts) => {
            let filter = std::env::var("TOLLGATE_LOG")
                .or_else(|_| std::env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string());
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
                .init();

            tracing::info!("tollgate starting");
            serve(opts.apply(config)).await?;
        }
        cli::Command::Ping(opts) => {
            ping::cmd_ping(&opts.addr, opts.count, &config).await?;
        }
    }

    Ok(())
}

async fn serve(config: tollgate_gate::GateConfig) -> anyhow::Result<()> {
    let (registry, pings) = protocol::server_registry(&config)?;
    let (notifier, events) = lifecycle::channel();
    let service = tokio::spawn(service::run(events, pings));

    let shutdown = CancellationToken::new();
    let signal = tokio::spawn(wait_for_signal(shutdown.clone()));

    let gate = Gate::new(config, registry).with_lifecycle(notifier);
    let result = gate.run(shutdown.clone()).await;
    shutdown.cancel();
    drop(gate);

    signal.await??;
    if service.await.is_err() {
        tracing::warn!("session service exited unexpectedly");
    }
    tracing::info!("tollgate stopped");
    Ok(result?)
}

/// Cancel `shutdown` on ctrl-c or SIGTERM.
async fn wait_for_signal(shutdown: CancellationToken) -> anyhow::Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
            _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
            () = shutdown.cancelled() => return Ok(()),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
            () = shutdown.cancelled() => return Ok(()),
        }
    }

    shutdown.cancel();
    Ok(())
}
