//! Fetch command: pull a report and print it

use clap::{Args, ValueEnum};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

use super::{parse_window, Cli, CliError, CredentialArgs, OutputFormat};
use crate::cancel::CancelSignal;
use crate::fetcher::retry_formatter::user_guidance;
use crate::fetcher::{ClickReportQuery, ConversionReportQuery, Paginator};
use crate::report::analytics::{self, ReportSummary};
use crate::report::ReportClient;
use crate::AggregatedResult;

/// Which report to fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportKind {
    /// Conversions by purchase time
    Conversions,
    /// Clicks by click time
    Clicks,
}

/// Fetch command arguments
#[derive(Args, Debug)]
pub struct FetchArgs {
    /// Account credentials
    #[command(flatten)]
    pub credentials: CredentialArgs,

    /// Window start (YYYY-MM-DD for start of day, or RFC3339)
    #[arg(long)]
    pub start: String,

    /// Window end (YYYY-MM-DD for end of day, or RFC3339)
    #[arg(long)]
    pub end: String,

    /// Report to fetch
    #[arg(long, value_enum, default_value = "conversions")]
    pub report: ReportKind,

    /// Nodes per page (1-500)
    #[arg(long, default_value = "100")]
    pub limit: u32,

    /// Only clicks tagged with this sub id
    #[arg(long)]
    pub sub_id: Option<String>,

    /// Maximum pages before the result is marked truncated
    #[arg(long, default_value = "100", value_parser = clap::value_parser!(u32).range(1..))]
    pub max_pages: u32,
}

impl FetchArgs {
    /// Execute the fetch command
    pub async fn execute(&self, cli: &Cli, cancel: Arc<CancelSignal>) -> Result<(), CliError> {
        let credential = self.credentials.credential()?;
        let window = parse_window(&self.start, &self.end)?;

        let ledger = Arc::new(cli.ledger().await);
        let paginator = Paginator::new(Arc::new(cli.transport()), ledger)
            .with_max_pages(self.max_pages);
        let client = ReportClient::from_paginator(paginator)
            .with_conversion_query(ConversionReportQuery::new().with_limit(self.limit)?);

        info!(
            account_id = %credential.account_id(),
            report = ?self.report,
            window = %window,
            "Fetching report"
        );

        let result = match self.report {
            ReportKind::Conversions => client
                .conversion_report(&credential, window, &cancel)
                .await
                .map(|r| (*r).clone()),
            ReportKind::Clicks => {
                let mut query = ClickReportQuery::new().with_limit(self.limit)?;
                if let Some(sub_id) = &self.sub_id {
                    query = query.with_sub_id(sub_id.clone());
                }
                client.click_report(&credential, window, &query, &cancel).await
            }
        };

        let result = match result {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "Fetch failed");
                eprintln!("{}", user_guidance(&e, chrono::Utc::now()));
                return Err(e.into());
            }
        };

        let status = client.rate_status(credential.account_id()).await;

        match cli.output_format {
            OutputFormat::Json => {
                let mut output = json!({
                    "report": self.report.to_possible_value().map(|v| v.get_name().to_string()),
                    "window": window,
                    "pagesFetched": result.pages_fetched,
                    "truncated": result.truncated,
                    "nodes": result.nodes,
                    "rateStatus": status,
                });
                if self.report == ReportKind::Conversions {
                    output["summary"] = serde_json::to_value(summary(&result)?)?;
                }
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Human => {
                println!(
                    "Fetched {} records over {} page(s){}",
                    result.len(),
                    result.pages_fetched,
                    if result.truncated {
                        " (truncated at page cap)"
                    } else {
                        ""
                    }
                );
                if self.report == ReportKind::Conversions {
                    print_summary(&summary(&result)?);
                }
                println!(
                    "\nQuota: {}/{} calls used ({}%), resets in {}",
                    status.used, status.total, status.percentage, status.time_until_reset
                );
            }
        }

        Ok(())
    }
}

fn summary(result: &AggregatedResult) -> Result<ReportSummary, CliError> {
    let nodes = result.conversions()?;
    Ok(analytics::summarize(&nodes))
}

fn print_summary(summary: &ReportSummary) {
    let totals = &summary.totals;
    println!("\nTotal commission: {}", totals.total_commission);
    println!(
        "Conversions: {} | Orders: {} | Items: {}",
        totals.conversions, totals.orders, totals.items
    );

    if !summary.daily.is_empty() {
        println!("\nDaily commission:");
        for day in &summary.daily {
            println!("  {} {}", day.date, day.commission);
        }
    }

    if !summary.top_by_commission.is_empty() {
        println!("\nTop items by commission:");
        for (rank, item) in summary.top_by_commission.iter().enumerate() {
            println!(
                "  {:>2}. {} ({} x{})",
                rank + 1,
                item.item_name,
                item.commission,
                item.qty
            );
        }
    }

    if !summary.top_sub_ids_by_commission.is_empty() {
        println!("\nTop sub ids by commission:");
        for (rank, stats) in summary.top_sub_ids_by_commission.iter().enumerate() {
            println!(
                "  {:>2}. {} ({}, {} orders)",
                rank + 1,
                stats.sub_id,
                stats.commission,
                stats.orders
            );
        }
    }
}
