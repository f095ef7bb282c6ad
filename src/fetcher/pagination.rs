//! Cursor-driven aggregation over all pages of a report
//!
//! One run walks the `scrollId` cursors strictly in order. Every attempt is
//! admitted by the [`RateLedger`] before it is signed and sent, and only
//! throttled attempts are retried, each with a fresh signature. A failure
//! at any page discards everything gathered so far.
//!
//! Safety mechanisms:
//! - Hard cap on pages per run (returned as a truncated result)
//! - Cancellation checked before each attempt and raced against every wait

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cancel::CancelSignal;
use crate::clock::{Clock, RandomSource, SystemClock, ThreadRandom};
use crate::fetcher::backoff::BackoffPolicy;
use crate::fetcher::config::MAX_PAGES;
use crate::fetcher::query::{GraphqlPayload, QueryBuilder};
use crate::fetcher::retry_formatter::RetryContext;
use crate::fetcher::{FetcherError, FetcherResult, SignedRequest, Transport};
use crate::ledger::RateLedger;
use crate::metrics;
use crate::{AggregatedResult, Credential, PageCursor, TimeWindow};

/// One decoded report page
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    /// Nodes in upstream order
    pub nodes: Vec<Value>,
    /// Cursor for the next page; `None` when this is the last page
    pub next_cursor: Option<PageCursor>,
}

/// Extract `data.<field>.nodes` and `pageInfo` from a GraphQL body
///
/// A missing `pageInfo`, a false `hasNextPage` or an empty `scrollId` all
/// mean there is no next page.
pub fn parse_page(mut body: Value, field: &str) -> FetcherResult<Page> {
    let mut report = match body.get_mut("data").and_then(|d| d.get_mut(field)) {
        Some(report) if report.is_object() => report.take(),
        _ => {
            return Err(FetcherError::InvalidResponse(format!(
                "response has no data.{field} object"
            )))
        }
    };

    let nodes = match report.get_mut("nodes").map(Value::take) {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(nodes)) => nodes,
        Some(other) => {
            return Err(FetcherError::InvalidResponse(format!(
                "data.{field}.nodes is not an array: {other}"
            )))
        }
    };

    let page_info = report.get("pageInfo");
    let has_next = page_info
        .and_then(|p| p.get("hasNextPage"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let scroll_id = page_info
        .and_then(|p| p.get("scrollId"))
        .and_then(Value::as_str)
        .unwrap_or_default();

    let next_cursor = (has_next && !scroll_id.is_empty()).then(|| PageCursor::from(scroll_id));

    Ok(Page { nodes, next_cursor })
}

/// Drives transport, ledger and backoff across all pages of a report
#[derive(Clone)]
pub struct Paginator {
    transport: Arc<dyn Transport>,
    ledger: Arc<RateLedger>,
    policy: BackoffPolicy,
    clock: Arc<dyn Clock>,
    random: Arc<dyn RandomSource>,
    max_pages: u32,
}

impl std::fmt::Debug for Paginator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Paginator")
            .field("policy", &self.policy)
            .field("max_pages", &self.max_pages)
            .finish_non_exhaustive()
    }
}

impl Paginator {
    /// Paginator with the default backoff policy and page cap
    pub fn new(transport: Arc<dyn Transport>, ledger: Arc<RateLedger>) -> Self {
        Self {
            transport,
            ledger,
            policy: BackoffPolicy::default(),
            clock: Arc::new(SystemClock),
            random: Arc::new(ThreadRandom),
            max_pages: MAX_PAGES,
        }
    }

    /// Override the retry policy
    pub fn with_backoff(mut self, policy: BackoffPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Clock used for signing timestamps
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Randomness used for backoff jitter
    pub fn with_random(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = random;
        self
    }

    /// Override the page cap
    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    /// Ledger gating every attempt
    pub fn ledger(&self) -> &Arc<RateLedger> {
        &self.ledger
    }

    /// Fetch every page of `query` over `window`
    ///
    /// # Errors
    /// Surfaces the first non-retried failure unchanged; the partial result
    /// is discarded. Returns [`FetcherError::Cancelled`] once `cancel` trips.
    pub async fn fetch_all(
        &self,
        credential: &Credential,
        query: &dyn QueryBuilder,
        window: TimeWindow,
        cancel: &CancelSignal,
    ) -> FetcherResult<AggregatedResult> {
        let field = query.report_field();
        let mut cursor = PageCursor::first();
        let mut nodes: Vec<Value> = Vec::new();
        let mut pages_fetched = 0u32;

        debug!(
            account_id = %credential.account_id(),
            report = field,
            window = %window,
            "Starting paginated fetch"
        );

        loop {
            if pages_fetched >= self.max_pages {
                warn!(
                    account_id = %credential.account_id(),
                    report = field,
                    pages = pages_fetched,
                    rows = nodes.len(),
                    "Page cap reached, returning truncated result"
                );
                return Ok(AggregatedResult {
                    nodes,
                    pages_fetched,
                    truncated: true,
                });
            }

            if cancel.is_cancelled() {
                info!(report = field, pages = pages_fetched, "Report cancelled between pages");
                return Err(FetcherError::Cancelled);
            }

            let payload = query.build(window, &cursor)?;
            let body = self
                .call_with_retry(credential, &payload, field, Some(window), cancel)
                .await?;
            let page = parse_page(body, field)?;

            pages_fetched += 1;
            metrics::record_page(field, page.nodes.len());
            debug!(
                report = field,
                page = pages_fetched,
                page_rows = page.nodes.len(),
                total_rows = nodes.len() + page.nodes.len(),
                has_next = page.next_cursor.is_some(),
                "Fetched page"
            );
            nodes.extend(page.nodes);

            match page.next_cursor {
                Some(next) => cursor = next,
                None => {
                    return Ok(AggregatedResult {
                        nodes,
                        pages_fetched,
                        truncated: false,
                    })
                }
            }
        }
    }

    /// Send one non-paginated payload (e.g. a mutation) under the same
    /// ledger and retry rules
    pub async fn execute(
        &self,
        credential: &Credential,
        payload: &GraphqlPayload,
        operation: &'static str,
        cancel: &CancelSignal,
    ) -> FetcherResult<Value> {
        self.call_with_retry(credential, payload, operation, None, cancel)
            .await
    }

    async fn call_with_retry(
        &self,
        credential: &Credential,
        payload: &GraphqlPayload,
        operation: &'static str,
        window: Option<TimeWindow>,
        cancel: &CancelSignal,
    ) -> FetcherResult<Value> {
        let body = payload.to_body()?;
        let mut attempt = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(FetcherError::Cancelled);
            }

            let admission = self
                .ledger
                .check_and_reserve_for(credential.account_id(), operation)
                .await;
            if !admission.allowed {
                return Err(admission.refusal());
            }

            let request =
                SignedRequest::from_body(credential, body.clone(), self.clock.now_seconds())
                    .with_operation(operation);

            let err = match self.transport.call(&request).await {
                Ok(response) => {
                    if attempt > 0 {
                        info!(operation, retries = attempt, "Request succeeded after retry");
                    }
                    return Ok(response);
                }
                Err(err) => err,
            };

            let decision = self.policy.decide(attempt, &err, self.random.as_ref());
            let context = RetryContext::new(
                attempt + 1,
                self.policy.max_attempts(),
                &err,
                decision.delay,
                operation,
                window,
            );

            if !decision.retry {
                if err.is_retryable() {
                    warn!(operation, "{}", context.format_failure());
                } else {
                    debug!(operation, error = %err, kind = err.kind(), "Request failed, not retrying");
                }
                return Err(err);
            }

            warn!(
                account_id = %credential.account_id(),
                operation,
                attempt = attempt + 1,
                delay_ms = decision.delay.as_millis() as u64,
                "{}",
                context.format_retry()
            );
            metrics::record_retry_backoff(decision.delay, attempt + 1);

            tokio::select! {
                _ = tokio::time::sleep(decision.delay) => {}
                _ = cancel.cancelled() => {
                    info!(operation, "Cancelled during backoff");
                    return Err(FetcherError::Cancelled);
                }
            }

            attempt += 1;
        }
    }
}
