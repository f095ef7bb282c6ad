//! Short-link command

use clap::Args;
use serde_json::json;
use std::sync::Arc;

use super::{Cli, CliError, CredentialArgs, OutputFormat};
use crate::cancel::CancelSignal;
use crate::fetcher::{Paginator, ShortLinkMutation};
use crate::report::ReportClient;

/// Short-link command arguments
#[derive(Args, Debug)]
pub struct ShortLinkArgs {
    /// Account credentials
    #[command(flatten)]
    pub credentials: CredentialArgs,

    /// Product or shop URL to wrap
    #[arg(long)]
    pub url: String,

    /// Sub ids to tag the link with (repeatable)
    #[arg(long = "sub-id")]
    pub sub_ids: Vec<String>,
}

impl ShortLinkArgs {
    /// Execute the short-link command
    pub async fn execute(&self, cli: &Cli, cancel: Arc<CancelSignal>) -> Result<(), CliError> {
        let credential = self.credentials.credential()?;
        let mutation = ShortLinkMutation::new(&self.url)?.with_sub_ids(self.sub_ids.iter().cloned());

        let paginator = Paginator::new(Arc::new(cli.transport()), Arc::new(cli.ledger().await));
        let client = ReportClient::from_paginator(paginator);
        let link = client
            .generate_short_link(&credential, &mutation, &cancel)
            .await?;

        match cli.output_format {
            OutputFormat::Json => println!(
                "{}",
                serde_json::to_string_pretty(&json!({ "shortLink": link }))?
            ),
            OutputFormat::Human => println!("{link}"),
        }

        Ok(())
    }
}
