use std::process;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use bms_api::bus::Bus;
use bms_api::cli::Cli;
use bms_api::cluster::{self, ClusterCache, Demux, SYNC_TIMEOUT};
use bms_api::config::Config;
use bms_api::health::EnvironmentSet;
use bms_api::probe::Prober;
use bms_api::server::{create_router, AppState};

/// Buffer between the watch tasks and the demultiplexer.
const EVENT_CHANNEL_DEPTH: usize = 256;

const LISTEN_ADDR: &str = "0.0.0.0:8080";

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    info!("Starting bms-api...");

    let config = match Config::load() {
        Ok((config, path)) => {
            info!("Loaded config file at {}.", path.display());
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            process::exit(1);
        }
    };

    let client = match cluster::connect(cli.kubeconfig.as_deref()).await {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to connect to Kubernetes: {e}");
            process::exit(1);
        }
    };

    let addons = match cluster::detect_addons(&client).await {
        Ok(addons) => Arc::new(addons),
        Err(e) => {
            error!("Failed to probe remote API groups: {e}");
            process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_DEPTH);

    let environments = Arc::new(EnvironmentSet::new(&config.environments));
    let bus = Arc::new(Bus::new(config.filters.clone()));
    let cache = Arc::new(ClusterCache::new(addons.has(cluster::ADDON_BACKUP)));
    cache.start(client.clone(), events_tx, shutdown_rx.clone());

    let demux = Demux::new(
        cache.clone(),
        bus.clone(),
        addons.clone(),
        environments.clone(),
        config.notification_delay(),
    );
    tokio::spawn(demux.run(events_rx, shutdown_rx.clone()));

    info!("Waiting for informer cache to sync...");
    let sync_started = std::time::Instant::now();
    if let Err(e) = cache.wait_for_sync(SYNC_TIMEOUT).await {
        error!("{e}");
        process::exit(1);
    }
    info!(
        "Informer cache sync completed. [{:.2}s]",
        sync_started.elapsed().as_secs_f64()
    );

    let prober = Arc::new(Prober::new(bus.clone(), environments.clone()));
    prober.reload(config.urls.clone()).await;
    tokio::spawn(prober.clone().run(shutdown_rx.clone()));

    let state = AppState::new(cache, bus, prober, addons, environments);

    if let Err(e) = serve(state).await {
        error!("{e:#}");
        let _ = shutdown_tx.send(true);
        process::exit(1);
    }

    // Signal background loops and give them a moment to drain.
    let _ = shutdown_tx.send(true);
    info!("Shutdown complete.");
}

async fn serve(state: AppState) -> anyhow::Result<()> {
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(LISTEN_ADDR)
        .await
        .with_context(|| format!("failed to bind {LISTEN_ADDR}"))?;

    info!("HTTP listener on {LISTEN_ADDR}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    Ok(())
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {e}"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, gracefully shutting down..."),
        _ = terminate => info!("Received SIGTERM, gracefully shutting down..."),
    }
}
