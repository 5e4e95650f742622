//! Standalone expiry sweeper.
//!
//! Deletes rows whose `expire` timestamp has passed from the table named by
//! `TABLE_NAME` in the account given by `TABLE_CONNECTION_STRING`.
//!
//! Usage: `expiry-sweeper [--once]`. Without `--once` a pass runs every
//! `SWEEP_INTERVAL_SECS` seconds (default: daily).

use replay_api::{
    config::SweeperConfig,
    expiry::{SweepOutcome, Sweeper},
    table::AzureTableStore,
};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    init_tracing();

    let Some(config) = SweeperConfig::from_env() else {
        error!("TABLE_CONNECTION_STRING is not set");
        return ExitCode::FAILURE;
    };

    let table = match AzureTableStore::from_connection_string(
        &config.connection_string,
        &config.table_name,
    ) {
        Ok(table) => table,
        Err(e) => {
            error!(error = %e, "Failed to configure table storage");
            return ExitCode::FAILURE;
        }
    };

    let sweeper = Arc::new(Sweeper::new(Arc::new(table), config.interval));
    let once = std::env::args().skip(1).any(|arg| arg == "--once");

    if once {
        return match sweeper.run_once().await {
            Ok(SweepOutcome::Completed(report)) => {
                info!(?report, table = %config.table_name, "Sweep complete");
                if report.failed > 0 {
                    ExitCode::FAILURE
                } else {
                    ExitCode::SUCCESS
                }
            }
            Ok(SweepOutcome::Skipped) => ExitCode::SUCCESS,
            Err(e) => {
                error!(error = %e, "Sweep failed");
                ExitCode::FAILURE
            }
        };
    }

    info!(table = %config.table_name, "Running scheduled sweeper");
    match sweeper.start().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Sweeper task ended");
            ExitCode::FAILURE
        }
    }
}

/// Initialize tracing with environment-based log levels.
fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("replay_api=debug,expiry_sweeper=debug")),
        )
        .init();
}
