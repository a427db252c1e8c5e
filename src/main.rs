//! pcbsim - Connection Lifecycle Simulator
//!
//! This is the main entry point. It loads the configuration and either
//! serves the line protocol over TCP or runs an in-process workload.

use anyhow::Context;
use pcbsim::config::{Command, Config};
use pcbsim::manager::{ConnectionManager, IdleReaper};
use pcbsim::{server, simulate};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn print_banner(config: &Config) {
    println!(
        r#"
pcbsim v{} - Connection Lifecycle Simulator
──────────────────────────────────────────────
Server started on {}
Idle timeout: {:?}

Use Ctrl+C to shutdown gracefully.
"#,
        pcbsim::VERSION,
        config.listen,
        config.reaper.idle_timeout,
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;

    // Set up logging; RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .context("invalid log level")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    let manager = Arc::new(ConnectionManager::with_config(
        config.connection.clone(),
        config.latency(),
    ));
    info!(connection = ?config.connection, "Connection manager initialized");

    if matches!(config.command, Command::Serve { .. }) {
        serve(config, manager).await
    } else {
        run_simulation(config, manager).await
    }
}

async fn serve(config: Config, manager: Arc<ConnectionManager>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;

    print_banner(&config);

    let _reaper = IdleReaper::start(Arc::clone(&manager), config.reaper.clone());

    // Set up graceful shutdown
    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received, stopping server...");
    };

    tokio::select! {
        _ = server::serve(listener, Arc::clone(&manager)) => {}
        _ = shutdown => {}
    }

    println!("{}", manager.statistics());
    info!("Server shutdown complete");
    Ok(())
}

async fn run_simulation(config: Config, manager: Arc<ConnectionManager>) -> anyhow::Result<()> {
    let simulate = config.simulate;
    let idle_timeout = config.reaper.idle_timeout;

    // Simulated latency sleeps the calling thread
    let report = tokio::task::spawn_blocking(move || {
        simulate::run(&manager, &simulate, idle_timeout, &mut rand::thread_rng())
    })
    .await
    .context("simulation task failed")?;

    println!("{}", report);
    Ok(())
}
