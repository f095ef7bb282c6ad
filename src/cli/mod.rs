//! CLI command implementations

use chrono::{DateTime, NaiveDate};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::fetcher::config::DEFAULT_ENDPOINT;
use crate::fetcher::HttpTransport;
use crate::ledger::{RateLedger, RedisLedgerStore};
use crate::{Credential, TimeWindow};

pub mod error;
pub mod fetch;
pub mod serve;
pub mod short_link;
pub mod status;

pub use error::CliError;
pub use fetch::FetchArgs;
pub use serve::ServeArgs;
pub use short_link::ShortLinkArgs;
pub use status::StatusArgs;

/// Affiliate reporting CLI
#[derive(Parser, Debug)]
#[command(name = "affiliate-reporting")]
#[command(about = "Rate-governed affiliate GraphQL reports and signing proxy", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Upstream GraphQL endpoint
    #[arg(long, global = true, env = "AFFILIATE_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,

    /// Redis URL for the shared quota ledger; process-local when unset
    #[arg(long, global = true, env = "LEDGER_REDIS_URL")]
    pub redis_url: Option<String>,

    /// Address for the Prometheus scrape endpoint
    #[arg(long, global = true, env = "METRICS_ADDR")]
    pub metrics_addr: Option<SocketAddr>,

    /// Output format (json or human)
    #[arg(long, global = true, default_value = "human")]
    pub output_format: OutputFormat,
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the signing proxy
    Serve(ServeArgs),

    /// Fetch a report for a date range
    Fetch(FetchArgs),

    /// Show or reset an account's hourly quota
    Status(StatusArgs),

    /// Create a tracking short link
    ShortLink(ShortLinkArgs),
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Human-readable output
    Human,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" => Ok(OutputFormat::Human),
            _ => Err(format!("Invalid output format: {s}")),
        }
    }
}

/// Account credentials shared by the commands that call the upstream
#[derive(clap::Args, Debug, Clone)]
pub struct CredentialArgs {
    /// Affiliate account (app) id
    #[arg(long, env = "AFFILIATE_ACCOUNT_ID")]
    pub account_id: String,

    /// Affiliate secret
    #[arg(long, env = "AFFILIATE_SECRET", hide_env_values = true)]
    pub secret: String,
}

impl CredentialArgs {
    /// Validated credential
    pub fn credential(&self) -> Result<Credential, CliError> {
        Ok(Credential::new(&self.account_id, &self.secret)?)
    }
}

impl Cli {
    /// Transport for the configured endpoint
    pub fn transport(&self) -> HttpTransport {
        HttpTransport::new(&self.endpoint)
    }

    /// Ledger backed by Redis when `--redis-url` is set
    ///
    /// An unreachable Redis at startup is logged and the ledger runs
    /// process-local.
    pub async fn ledger(&self) -> RateLedger {
        let ledger = RateLedger::new();

        let Some(url) = self.redis_url.as_deref() else {
            return ledger;
        };

        match RedisLedgerStore::connect(url).await {
            Ok(store) => {
                info!("Using shared Redis quota ledger");
                ledger.with_store(Arc::new(store))
            }
            Err(e) => {
                warn!(error = %e, "Redis ledger unavailable, counting quota in-process");
                ledger
            }
        }
    }

    /// Install the Prometheus exporter when `--metrics-addr` is set
    pub fn init_metrics(&self) -> Result<(), CliError> {
        if let Some(addr) = self.metrics_addr {
            crate::metrics::init_metrics(addr)
                .map_err(|e| CliError::ConfigurationError(e.to_string()))?;
        }
        Ok(())
    }
}

fn try_parse_datetime_rfc3339(input: &str) -> Option<i64> {
    let input = input.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.timestamp());
    }

    // No offset: assume UTC
    if let Ok(dt) = DateTime::parse_from_rfc3339(&format!("{input}Z")) {
        return Some(dt.timestamp());
    }

    None
}

/// Parse a window start from YYYY-MM-DD (start of day, UTC) or RFC3339
pub fn parse_start_time(input: &str) -> Result<i64, CliError> {
    if let Some(ts) = try_parse_datetime_rfc3339(input) {
        return Ok(ts);
    }

    let date = NaiveDate::parse_from_str(input.trim(), "%Y-%m-%d")
        .map_err(|e| CliError::InvalidArgument(format!("Invalid start time {input:?}: {e}")))?;
    let datetime = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| CliError::InvalidArgument("Invalid start time".to_string()))?;
    Ok(datetime.and_utc().timestamp())
}

/// Parse a window end from YYYY-MM-DD (last second of the day, UTC) or RFC3339
pub fn parse_end_time(input: &str) -> Result<i64, CliError> {
    if let Some(ts) = try_parse_datetime_rfc3339(input) {
        return Ok(ts);
    }

    let date = NaiveDate::parse_from_str(input.trim(), "%Y-%m-%d")
        .map_err(|e| CliError::InvalidArgument(format!("Invalid end time {input:?}: {e}")))?;
    let datetime = date
        .and_hms_opt(23, 59, 59)
        .ok_or_else(|| CliError::InvalidArgument("Invalid end time".to_string()))?;
    Ok(datetime.and_utc().timestamp())
}

/// Window from `--start` / `--end` arguments
pub fn parse_window(start: &str, end: &str) -> Result<TimeWindow, CliError> {
    let window = TimeWindow::new(parse_start_time(start)?, parse_end_time(end)?)?;
    Ok(window)
}
