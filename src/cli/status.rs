//! Status command: inspect or reset an account's quota window

use clap::Args;

use super::{Cli, CliError, OutputFormat};
use crate::ledger::RateLedger;

/// Status command arguments
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Affiliate account (app) id
    #[arg(long, env = "AFFILIATE_ACCOUNT_ID")]
    pub account_id: String,

    /// Clear the account's window before reporting
    #[arg(long, default_value_t = false)]
    pub reset: bool,
}

impl StatusArgs {
    /// Execute the status command
    pub async fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        if self.account_id.trim().is_empty() {
            return Err(CliError::InvalidArgument(
                "account id cannot be empty".to_string(),
            ));
        }

        let ledger = cli.ledger().await;
        self.report(&ledger, cli.output_format).await
    }

    async fn report(&self, ledger: &RateLedger, format: OutputFormat) -> Result<(), CliError> {
        if self.reset {
            ledger.reset(&self.account_id).await;
        }

        let status = ledger.status(&self.account_id).await;

        match format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&status)?),
            OutputFormat::Human => {
                println!("Account: {}", self.account_id);
                println!(
                    "Used: {}/{} ({}%), {} remaining",
                    status.used, status.total, status.percentage, status.remaining
                );
                println!(
                    "Resets at: {} ({})",
                    status.reset_time.format("%Y-%m-%d %H:%M:%S UTC"),
                    status.time_until_reset
                );
                println!("Ledger: {:?}", status.mode);
                if status.exceeded {
                    println!("Quota spent: calls are refused until the window resets");
                } else if status.approaching {
                    println!(
                        "Approaching the limit (warning at {} calls)",
                        status.warning_threshold
                    );
                }
            }
        }

        Ok(())
    }
}
