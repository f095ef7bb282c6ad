//! # Affiliate Reporting Library
//!
//! A rate-governed request pipeline for an affiliate commerce GraphQL API.
//! Queries are signed with the caller's credentials, forwarded to the
//! upstream endpoint, retried with exponential backoff when the provider
//! throttles, paginated across cursor-linked pages and cached per time window.
//!
//! ## Features
//!
//! - **Request Signing**: SHA-256 `Authorization` header compatible with the upstream verifier
//! - **Backoff**: Jittered exponential retry that only fires on provider throttling
//! - **Rate Ledger**: Hourly quota bookkeeping, shared through Redis or local to the process
//! - **Pagination**: All-or-nothing aggregation over `scrollId` cursors with a hard page cap
//! - **Result Cache**: TTL cache keyed by account and query window
//! - **Proxy**: Thin axum service that keeps the shared secret off the browser
//!
//! ## Quick Start
//!
//! ```no_run
//! use affiliate_reporting::cancel::CancelSignal;
//! use affiliate_reporting::report::ReportClient;
//! use affiliate_reporting::{Credential, TimeWindow};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let credential = Credential::new("1234567890", "affiliate-secret")?;
//! let window = TimeWindow::new(1_700_000_000, 1_700_086_399)?;
//!
//! let client = ReportClient::new();
//! let cancel = CancelSignal::shared();
//! let report = client.conversion_report(&credential, window, &cancel).await?;
//! println!("{} conversions over {} pages", report.len(), report.pages_fetched);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`fetcher`] - Signing, query building, transport, backoff and pagination
//! - [`ledger`] - Per-account quota ledger with pluggable stores
//! - [`cache`] - Result cache keyed by (account, window)
//! - [`report`] - Cache-plus-paginator facade and report analytics
//! - [`proxy`] - HTTP proxy boundary
//! - [`cli`] - Command line interface

#![warn(missing_docs)]
#![warn(clippy::all)]

use chrono::{NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result cache keyed by account and query window
pub mod cache;

/// Cooperative cancellation for report runs
pub mod cancel;

/// CLI command implementations
pub mod cli;

/// Injectable time and randomness sources
pub mod clock;

/// Upstream request pipeline
pub mod fetcher;

/// Hourly request quota bookkeeping
pub mod ledger;

/// Observability metrics
pub mod metrics;

/// HTTP proxy boundary
pub mod proxy;

/// Report facade and analytics
pub mod report;

pub use fetcher::{FetcherError, FetcherResult};

/// Caller-supplied API credentials
///
/// Both fields are validated to be non-empty on construction. The secret is
/// redacted from `Debug` output and never logged.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    account_id: String,
    secret: String,
}

impl Credential {
    /// Create a credential, rejecting empty account ids or secrets
    pub fn new(account_id: impl Into<String>, secret: impl Into<String>) -> FetcherResult<Self> {
        let account_id = account_id.into();
        let secret = secret.into();

        if account_id.trim().is_empty() {
            return Err(FetcherError::InvalidCredential(
                "account id cannot be empty".to_string(),
            ));
        }
        if secret.trim().is_empty() {
            return Err(FetcherError::InvalidCredential(
                "secret cannot be empty".to_string(),
            ));
        }

        Ok(Self { account_id, secret })
    }

    /// Account identifier (the upstream "app id")
    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// Shared secret used for signing
    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("account_id", &self.account_id)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Inclusive query window in Unix seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Window start (Unix seconds)
    pub start: i64,
    /// Window end (Unix seconds)
    pub end: i64,
}

impl TimeWindow {
    /// Create a window, validating `0 <= start <= end`
    pub fn new(start: i64, end: i64) -> FetcherResult<Self> {
        if start < 0 {
            return Err(FetcherError::InvalidQuery(format!(
                "window start must be non-negative, got {start}"
            )));
        }
        if end < start {
            return Err(FetcherError::InvalidQuery(format!(
                "window end ({end}) must not be before start ({start})"
            )));
        }
        Ok(Self { start, end })
    }

    /// Window covering whole UTC days: start-of-day of `first` to the last second of `last`
    pub fn from_dates(first: NaiveDate, last: NaiveDate) -> FetcherResult<Self> {
        let start = first
            .and_hms_opt(0, 0, 0)
            .map(|dt| Utc.from_utc_datetime(&dt).timestamp())
            .ok_or_else(|| FetcherError::InvalidQuery(format!("invalid start date {first}")))?;
        let end = last
            .and_hms_opt(23, 59, 59)
            .map(|dt| Utc.from_utc_datetime(&dt).timestamp())
            .ok_or_else(|| FetcherError::InvalidQuery(format!("invalid end date {last}")))?;
        Self::new(start, end)
    }

    /// Window length in whole days, rounded up
    pub fn days(&self) -> i64 {
        (self.end - self.start + 86_399) / 86_400
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Opaque pagination token; the empty cursor denotes the first page
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageCursor(String);

impl PageCursor {
    /// Cursor for the first page
    pub fn first() -> Self {
        Self(String::new())
    }

    /// Whether this cursor points at the first page
    pub fn is_first(&self) -> bool {
        self.0.is_empty()
    }

    /// Raw token
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for PageCursor {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for PageCursor {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Record nodes assembled across all pages of one paginator run
///
/// Node order is page arrival order, and upstream order within a page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatedResult {
    /// Upstream record nodes, unchanged
    pub nodes: Vec<serde_json::Value>,
    /// Number of pages fetched
    pub pages_fetched: u32,
    /// True when the page cap stopped the run before the upstream reported the last page
    pub truncated: bool,
}

impl AggregatedResult {
    /// Whether the run reached the upstream's last page
    pub fn is_complete(&self) -> bool {
        !self.truncated
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no nodes were returned
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Decode nodes as conversion records
    pub fn conversions(&self) -> Result<Vec<ConversionNode>, serde_json::Error> {
        self.nodes
            .iter()
            .map(|node| serde_json::from_value(node.clone()))
            .collect()
    }
}

/// Conversion record from the conversion report
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConversionNode {
    /// Purchase time (Unix seconds)
    pub purchase_time: Option<i64>,
    /// Click time (Unix seconds)
    pub click_time: Option<i64>,
    /// Conversion status
    pub conversion_status: Option<String>,
    /// Total commission for the conversion
    pub total_commission: Option<Decimal>,
    /// Seller-funded commission
    pub seller_commission: Option<Decimal>,
    /// Buyer type (new / existing)
    pub buyer_type: Option<String>,
    /// Sub ids, dash separated
    pub utm_content: Option<String>,
    /// Device the click came from
    pub device: Option<String>,
    /// Orders attributed to this conversion
    pub orders: Vec<ConversionOrder>,
}

/// Order within a conversion
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConversionOrder {
    /// Order status
    pub order_status: Option<String>,
    /// Shop type
    pub shop_type: Option<String>,
    /// Items in the order
    pub items: Vec<ConversionItem>,
}

/// Item within an order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConversionItem {
    /// Item name
    pub item_name: Option<String>,
    /// Shop name
    pub shop_name: Option<String>,
    /// Unit price
    pub item_price: Option<Decimal>,
    /// Quantity
    pub qty: Option<i64>,
    /// Total commission for the item
    pub item_total_commission: Option<Decimal>,
    /// Channel type
    pub channel_type: Option<String>,
    /// Top-level category name
    pub global_category_lv1_name: Option<String>,
}
