//! Main entry point for the commcare-downloader CLI

use clap::Parser;
use commcare_downloader::cli::Cli;
use commcare_downloader::shutdown::{self, ShutdownCoordinator};
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber with optional JSON formatting
fn init_tracing() {
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("commcare_downloader=info"));

    // Logs go to stderr so stdout stays parseable in JSON output mode
    if json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();

    let shutdown = ShutdownCoordinator::shared();
    shutdown::set_global_shutdown(shutdown.clone());
    shutdown::install_ctrl_c_handler(shutdown.clone());

    let result = cli
        .execute(shutdown)
        .await
        .map_err(|e| (e.exit_code(), anyhow::anyhow!(e)));

    match result {
        Ok(code) => std::process::exit(code),
        Err((code, e)) => {
            error!("Command failed: {:#}", e);
            eprintln!("Error: {e:#}");
            std::process::exit(code);
        }
    }
}
