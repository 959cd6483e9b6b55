//! EVM multi-chain job executor.
//!
//! # Architecture Overview
//!
//! ```text
//!   jobs (JSONL file / stdin / POST /jobs)
//!        │
//!        ▼
//!   ┌──────────────┐    ┌───────────────┐    ┌─────────────────────┐
//!   │ worker pool  │───▶│ retry manager │───▶│ transaction executor│
//!   │ (semaphore)  │    │ + dead letter │    │ (idempotent claims) │
//!   └──────────────┘    └───────────────┘    └──────────┬──────────┘
//!                                                        │
//!                         ┌──────────────────────────────┼───────────────┐
//!                         ▼                              ▼               ▼
//!                  ┌─────────────┐              ┌──────────────┐  ┌────────────┐
//!                  │ repository  │              │ circuit      │  │ signer +   │
//!                  │ (file/mem)  │              │ breaker/RPC  │  │ confirmer  │
//!                  └─────────────┘              └──────────────┘  └────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::TcpListener;

use evm_executor::admin::{admin_router, AdminState};
use evm_executor::config::load_config;
use evm_executor::execution::ConfirmationSweeper;
use evm_executor::lifecycle::signals::shutdown_on_signal;
use evm_executor::lifecycle::{build_runtime, Runtime, Shutdown};
use evm_executor::observability::{logging, metrics};
use evm_executor::queue::feed_lines;

#[derive(Parser)]
#[command(name = "evm-executor")]
#[command(about = "Executes blockchain jobs against EVM chains exactly once", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "executor.toml")]
    config: PathBuf,

    /// Newline-delimited JSON jobs to process; `-` reads stdin.
    #[arg(short, long)]
    jobs: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    logging::init_logging(&config.observability);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "evm-executor starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    tokio::spawn(shutdown_on_signal(shutdown.clone()));

    let Runtime {
        config,
        repository,
        registry,
        workers,
        jobs,
        inbox,
        ..
    } = build_runtime(config).await?;

    let mut background = Vec::new();

    if config.sweeper.enabled {
        let sweeper = ConfirmationSweeper::from_config(repository.clone(), registry.clone(), &config.sweeper);
        let interval = Duration::from_secs(config.sweeper.interval_secs);
        background.push(tokio::spawn(sweeper.run(interval, shutdown.token())));
    }

    if config.admin.enabled {
        let state = AdminState::new(repository.clone(), registry.clone(), jobs.clone(), &config.admin);
        let app = admin_router(state, Duration::from_secs(config.admin.request_timeout_secs));
        let listener = TcpListener::bind(&config.admin.bind_address).await?;
        tracing::info!(address = %listener.local_addr()?, "Admin API listening");

        let token = shutdown.token();
        background.push(tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = served {
                tracing::error!(error = %e, "Admin API stopped with error");
            }
        }));
    }

    match cli.jobs.as_deref() {
        Some("-") => {
            let feed = feed_lines(BufReader::new(tokio::io::stdin()), jobs, shutdown.token());
            background.push(tokio::spawn(async move {
                if let Err(e) = feed.await {
                    tracing::error!(error = %e, "Reading jobs from stdin failed");
                }
            }));
        }
        Some(path) => {
            let file = tokio::fs::File::open(path).await?;
            let feed = feed_lines(BufReader::new(file), jobs, shutdown.token());
            background.push(tokio::spawn(async move {
                if let Err(e) = feed.await {
                    tracing::error!(error = %e, "Reading jobs file failed");
                }
            }));
        }
        // Without a feed the admin API holds the only sender.
        None => drop(jobs),
    }

    workers.run(inbox, shutdown.token()).await;

    // The inbox closed on its own; stop the remaining background tasks too.
    shutdown.trigger();
    for task in background {
        let _ = task.await;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
