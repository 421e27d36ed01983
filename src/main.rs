//! stopgap - demo server with graceful shutdown
//!
//! Usage:
//!     stopgap [--config <path>] [--listen <addr>]
//!
//! Send SIGINT or SIGTERM to start a graceful shutdown; send it twice to
//! force an immediate stop. `SHUTDOWN_DEADLINE` overrides the grace period.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use stopgap::config::{load_config, Config};
use stopgap::server::HelloServer;
use stopgap::util::init_logging;
use stopgap::{EventEngine, EventLoop, ShutdownCoordinator};

/// Hello-world HTTP server demonstrating graceful shutdown.
#[derive(Parser, Debug)]
#[command(name = "stopgap")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the listen address
    #[arg(short = 'L', long, value_name = "ADDR")]
    listen: Option<SocketAddr>,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path).with_context(|| {
            format!("failed to load configuration from '{}'", path.display())
        })?,
        None => Config::from_env().context("failed to read configuration from environment")?,
    };

    if let Some(listen) = cli.listen {
        config.server.listen = listen;
    }

    let log_level = cli
        .log_level
        .as_deref()
        .unwrap_or(&config.global.log_level);

    init_logging(log_level, &config.global.log_format)
        .context("failed to initialize logging")?;

    if cli.validate {
        info!("Configuration is valid");
        println!("Configuration is valid.");
        println!("  Listen: {}", config.server.listen);
        println!(
            "  Shutdown deadline: {}",
            humantime::format_duration(config.shutdown.deadline)
        );
        println!(
            "  Poll interval: {}",
            humantime::format_duration(config.shutdown.poll_interval)
        );
        return Ok(());
    }

    info!(
        listen = %config.server.listen,
        grace_period = %humantime::format_duration(config.shutdown.deadline),
        "stopgap starting"
    );

    run(config)
}

/// Build the runtime and drive the event loop on the main thread.
///
/// Signals are observed on runtime worker threads and handed to the loop.
fn run(config: Config) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    runtime.block_on(async { run_async(config).await })
}

async fn run_async(config: Config) -> Result<()> {
    let event_loop = EventLoop::new();
    let engine: Arc<dyn EventEngine> = Arc::new(event_loop.clone());

    let coordinator = Arc::new(ShutdownCoordinator::new(
        Arc::clone(&engine),
        &config.shutdown,
    ));
    coordinator
        .install_handlers()
        .context("failed to install signal handlers")?;

    let server = HelloServer::bind(config.server.listen, Arc::clone(&engine))
        .await
        .with_context(|| format!("failed to bind http server on {}", config.server.listen))?;

    let stopper = server.stopper();
    coordinator.at_shutdown_named("http-server-stop", move || {
        stopper.shutdown();
        Ok(())
    })?;

    let served = server.served();
    let server_task = tokio::spawn(server.run());

    info!("stopgap is running");
    info!("press Ctrl+C to stop");

    event_loop.run().await.context("event loop failed")?;

    // Connections still open after the grace period go down with the runtime.
    server_task.abort();

    info!(
        requests = served.load(std::sync::atomic::Ordering::Relaxed),
        reason = ?coordinator.stop_reason(),
        "stopgap shut down"
    );
    Ok(())
}
