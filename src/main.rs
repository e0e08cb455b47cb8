mod config;
mod events;
mod logging;
mod middleware;
mod reporter;
mod routes;
mod storage;
mod webstats;

use crate::storage::StorageError;
use crate::webstats::WebStatsChannel;

use clap::Parser;
use flexi_logger::{FlexiLoggerError, LoggerHandle};
use thiserror::Error;
use tokio;
use tokio::sync::watch;
use log;
use warp;
use std::net::SocketAddr;
use std::path::PathBuf;

/// A minimal analytics event collector
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Path to the configuration file (defaults to $WEBTICS_CONFIG, then the usual locations)
    config: Option<PathBuf>,
}

/// Anything which prevents webtics from starting
#[derive(Error, Debug)]
enum StartupError {
    #[error("failed to process configuration file: {0}")]
    Configuration(String),
    #[error("failed to start logger: {0}")]
    Logging(#[from] FlexiLoggerError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("failed to bind: {0}")]
    Bind(#[from] warp::Error),
}

/// Resolves once the process is asked to stop (Ctrl-C, or SIGTERM on unix)
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => tokio::select! {
                _ = tokio::signal::ctrl_c() => {},
                _ = terminate.recv() => {},
            },
            Err(e) => {
                log::warn!("cannot listen for SIGTERM, only Ctrl-C will stop webtics: {}", e);
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await.ok();
}

/// Loads everything, then serves until shutdown
async fn run(args: Args, logger: &LoggerHandle) -> Result<(), StartupError> {
    /* Locate and parse the configuration file, see config.rs */
    let configuration = config::get_configuration(args.config.as_ref())
        .map_err(StartupError::Configuration)?;
    logging::reconfigure_logger(logger, &configuration.logging);

    /* Open the database, create the events table if needed */
    let store = storage::init_store(&configuration.storage).await?;

    if !configuration.server.static_dir.is_dir() {
        log::warn!("static directory {} does not exist, /static/ will only return 404s", configuration.server.static_dir.display());
    }

    /* Web statistics collector, fed by the routes and read by the reporter */
    let stats = WebStatsChannel::new();
    let stats_handle = stats.handle();
    tokio::spawn(stats.run_channel());

    /* Everyone waits on this to stop */
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut server_shutdown = shutdown_rx.clone();
    let address = SocketAddr::new(configuration.server.ip, configuration.server.port);
    let (bound_address, webservice) = warp::serve(routes::routes(store.clone(), stats_handle.clone(), &configuration.server))
        .try_bind_with_graceful_shutdown(address, async move {
            server_shutdown.changed().await.ok();
        })?;
    log::info!("listening on {}", bound_address);

    let reporter = reporter::run_reporter(store, stats_handle, *configuration.reporter.interval, shutdown_rx);

    /* Start everything */
    tokio::join!(
        webservice,
        reporter,
        async move {
            shutdown_signal().await;
            log::info!("shutting down, waiting for pending requests");
            shutdown_tx.send(true).ok();
        }
    );

    Ok(())
}

/// webtics' entry point: welcome!
#[tokio::main]
async fn main() {
    /* Set a panic hook: we want a task panic to crash the whole process */
    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_panic(info);
        std::process::exit(1);
    }));

    /* Log with defaults until the configuration is loaded */
    let logger = match logging::init_logger(&config::Logging::default()) {
        Ok(l) => l,
        Err(e) => {
            eprintln!("{}", StartupError::from(e));
            std::process::exit(1);
        }
    };

    if let Err(e) = run(Args::parse(), &logger).await {
        log::error!("{}", e);
        logger.flush();
        std::process::exit(1);
    }
}
