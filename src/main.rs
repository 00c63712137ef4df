//! vhost-registrar daemon.
//!
//! # Architecture Overview
//!
//! ```text
//!   backend services                           discovery daemon (Avahi)
//!        │ newline-delimited JSON                      ▲ alias records
//!        ▼                                             │
//!  ┌──────────────┐    desired set      ┌──────────────┴─┐
//!  │ registration │────────────────────▶│ advertiser task│
//!  │   channel    │                     └────────────────┘
//!  └──────┬───────┘
//!         │ fragments
//!         ▼
//!  ┌──────────────┐  write config + reload  ┌────────────┐
//!  │  front-end   │────────────────────────▶│   httpd    │
//!  │  supervisor  │                         └────────────┘
//!  └──────────────┘
//! ```
//!
//! Everything runs on one current-thread runtime. The advertiser is a
//! separate task so the discovery daemon never stalls registration; see
//! `lifecycle` for the startup and shutdown order.

use std::path::PathBuf;

use clap::Parser;
use tokio::sync::mpsc;

use vhost_registrar::advertiser::avahi::connect_system_bus;
use vhost_registrar::advertiser::{spawn_bus_watcher, AvahiDaemon, DetachedDaemon, DiscoveryDaemon};
use vhost_registrar::config::loader::{load_or_default, ConfigSource};
use vhost_registrar::frontend::HttpdProcess;
use vhost_registrar::lifecycle::signals::spawn_signal_listener;
use vhost_registrar::observability::{logging, metrics};
use vhost_registrar::{DaemonError, Orchestrator, Shutdown};

#[derive(Parser)]
#[command(name = "vhost-registrar")]
#[command(about = "Keeps an HTTP front end in sync with registered backends", long_about = None)]
struct Cli {
    /// Configuration file; defaults apply when it does not exist
    #[arg(short, long, default_value = "/etc/vhost-registrar/config.toml")]
    config: PathBuf,
}

fn main() -> Result<(), DaemonError> {
    let cli = Cli::parse();
    let (config, source) = load_or_default(&cli.config)?;
    logging::init_logging(&config.observability);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "vhost-registrar starting"
    );
    if source == ConfigSource::Defaults {
        tracing::info!(path = %cli.config.display(), "No configuration file, using defaults");
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(config))
}

async fn run(config: vhost_registrar::DaemonConfig) -> Result<(), DaemonError> {
    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let (advertiser_tx, advertiser_rx) = mpsc::unbounded_channel();
    let mut bus_watcher = None;
    let daemon: Box<dyn DiscoveryDaemon> = if config.advertiser.enabled {
        match connect_system_bus().await {
            Ok(conn) => {
                match spawn_bus_watcher(&conn, advertiser_tx.clone()).await {
                    Ok(handle) => bus_watcher = Some(handle),
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to watch for the discovery daemon")
                    }
                }
                Box::new(AvahiDaemon::new(conn, advertiser_tx))
            }
            Err(e) => {
                tracing::warn!(error = %e, "System bus unavailable, domain advertisement disabled");
                Box::new(DetachedDaemon)
            }
        }
    } else {
        tracing::info!("Domain advertisement disabled by configuration");
        Box::new(DetachedDaemon)
    };

    let process = Box::new(HttpdProcess::new(&config.frontend.binary));
    let mut orchestrator = Orchestrator::new(config, process, daemon, advertiser_rx);
    orchestrator.start().await?;

    let shutdown = Shutdown::new();
    let events = shutdown.subscribe();
    let signals = spawn_signal_listener(shutdown.clone());

    let result = orchestrator.run(events).await;
    orchestrator.shutdown().await;

    signals.abort();
    if let Some(handle) = bus_watcher {
        handle.abort();
    }
    result
}
