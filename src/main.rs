//! Main entry point for the affiliate-reporting CLI

use affiliate_reporting::cancel::CancelSignal;
use affiliate_reporting::cli::{Cli, Commands};
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber with optional JSON formatting
fn init_tracing() {
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("affiliate_reporting=info"));

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

    if let Err(e) = cli.init_metrics() {
        error!("Metrics setup failed: {}", e);
        std::process::exit(1);
    }

    // Serve installs its own shutdown handler; report commands cancel between pages
    let cancel = CancelSignal::shared();
    if !matches!(cli.command, Commands::Serve(_)) {
        tokio::spawn({
            let cancel = cancel.clone();
            async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Ctrl+C received - cancelling report");
                    cancel.cancel();
                }
            }
        });
    }

    let result = match &cli.command {
        Commands::Serve(args) => args.execute(&cli).await,
        Commands::Fetch(args) => args.execute(&cli, cancel.clone()).await,
        Commands::Status(args) => args.execute(&cli).await,
        Commands::ShortLink(args) => args.execute(&cli, cancel.clone()).await,
    };

    if let Err(e) = result {
        let code = e.exit_code();
        let e = anyhow::Error::from(e);
        error!("Command failed: {:#}", e);
        std::process::exit(code);
    }
}
