//! logsrv - PLC register logging bridge service
//!
//! Wires the protocol client, value store, persistence sinks and register
//! loggers together and drives the poll loop. Configuration reloads arrive
//! as validated snapshots on a channel (SIGHUP re-reads the file); ctrl-c
//! shuts the loop down.

use std::sync::Arc;

use clap::Parser;
use logsrv::config::Config;
use logsrv::poller::Poller;
use logsrv::sink::SinkRegistry;
use logsrv::{Result, SERVICE_NAME, SERVICE_VERSION};
use mcproto::McClient;
use tokio::signal;
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(name = SERVICE_NAME, version, about = "PLC register logging bridge")]
struct Args {
    /// Path to the service configuration file
    #[arg(short, long, env = "LOGSRV_CONFIG", default_value = "config/logsrv.yaml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let args = Args::parse();
    let config = Config::load(&args.config)?;

    tracing::info!(
        "Starting {} v{} - {} registers, polling every {:?}",
        SERVICE_NAME,
        SERVICE_VERSION,
        config.registers.len(),
        config.service.poll_interval
    );

    let client = Arc::new(McClient::new(config.plc.client_config())?);
    let sinks = Arc::new(SinkRegistry::new());

    let (reload_tx, reload_rx) = mpsc::channel::<Config>(4);
    let poller = Poller::new(&config, client, sinks)
        .await?
        .with_reload_channel(reload_rx);

    let poller_handle = tokio::spawn(async move {
        if let Err(e) = poller.run().await {
            tracing::error!("Poller error: {e}");
        }
    });

    // SIGHUP re-reads the configuration file and publishes the validated
    // snapshot; the poller swaps its register set on the next tick.
    #[cfg(unix)]
    {
        let config_path = args.config.clone();
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sighup = match signal(SignalKind::hangup()) {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!("Failed to create SIGHUP listener: {e}");
                    return;
                },
            };

            loop {
                sighup.recv().await;
                tracing::info!("Received SIGHUP, reloading configuration...");
                match Config::load(&config_path) {
                    Ok(new_config) => {
                        if let Err(e) = reload_tx.send(new_config).await {
                            tracing::error!("Failed to publish configuration snapshot: {e}");
                        }
                    },
                    Err(e) => tracing::error!("Failed to reload configuration: {e}"),
                }
            }
        });
    }

    match signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received shutdown signal"),
        Err(e) => tracing::error!("Failed to listen for shutdown signal: {e}"),
    }

    poller_handle.abort();
    let _ = poller_handle.await;

    tracing::info!("{SERVICE_NAME} stopped");
    Ok(())
}

/// Initializes the logging system.
fn init_logging() {
    let log_level =
        std::env::var("RUST_LOG").unwrap_or_else(|_| format!("{}=info", env!("CARGO_PKG_NAME")));

    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .init();
}
