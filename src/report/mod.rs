//! Report facade: cache in front of the paginator
//!
//! [`ReportClient`] answers conversion reports from the [`ResultCache`] when
//! it can, otherwise paginates and stores complete results. Click reports
//! and short links bypass the cache.

use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::cache::ResultCache;
use crate::cancel::CancelSignal;
use crate::fetcher::{
    ClickReportQuery, ConversionReportQuery, FetcherError, FetcherResult, HttpTransport, Paginator,
    QueryBuilder, ShortLinkMutation, Transport,
};
use crate::ledger::{RateLedger, RateStatus};
use crate::metrics::ReportMetrics;
use crate::{AggregatedResult, Credential, TimeWindow};

pub mod analytics;

/// Cached, rate-governed access to the affiliate reports
#[derive(Debug, Clone)]
pub struct ReportClient {
    paginator: Paginator,
    cache: Arc<ResultCache>,
    conversion_query: ConversionReportQuery,
}

impl Default for ReportClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportClient {
    /// Client for the production endpoint with a process-local ledger
    pub fn new() -> Self {
        Self::with_transport(Arc::new(HttpTransport::default()), Arc::new(RateLedger::new()))
    }

    /// Client over a specific transport and ledger
    pub fn with_transport(transport: Arc<dyn Transport>, ledger: Arc<RateLedger>) -> Self {
        Self::from_paginator(Paginator::new(transport, ledger))
    }

    /// Client over a configured paginator
    pub fn from_paginator(paginator: Paginator) -> Self {
        Self {
            paginator,
            cache: Arc::new(ResultCache::new()),
            conversion_query: ConversionReportQuery::new(),
        }
    }

    /// Share a cache between clients
    pub fn with_cache(mut self, cache: Arc<ResultCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Query used for conversion reports
    pub fn with_conversion_query(mut self, query: ConversionReportQuery) -> Self {
        self.conversion_query = query;
        self
    }

    /// Result cache
    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    /// Quota ledger
    pub fn ledger(&self) -> &Arc<RateLedger> {
        self.paginator.ledger()
    }

    /// Conversion report for `window`, served from cache when fresh
    ///
    /// Only complete results are cached; a page-capped result is returned
    /// but not stored.
    pub async fn conversion_report(
        &self,
        credential: &Credential,
        window: TimeWindow,
        cancel: &CancelSignal,
    ) -> FetcherResult<Arc<AggregatedResult>> {
        if let Some(cached) = self.cache.get(credential.account_id(), window) {
            return Ok(cached);
        }

        let result = Arc::new(self.run(credential, &self.conversion_query, window, cancel).await?);

        if result.is_complete() {
            self.cache
                .insert(credential.account_id(), window, Arc::clone(&result));
        } else {
            debug!(
                account_id = %credential.account_id(),
                window = %window,
                "Not caching truncated report"
            );
        }

        Ok(result)
    }

    /// Drop the cached entry for `window` and fetch it again
    pub async fn refresh_conversion_report(
        &self,
        credential: &Credential,
        window: TimeWindow,
        cancel: &CancelSignal,
    ) -> FetcherResult<Arc<AggregatedResult>> {
        self.cache.invalidate_window(credential.account_id(), window);
        self.conversion_report(credential, window, cancel).await
    }

    /// Click report for `window`; never cached
    pub async fn click_report(
        &self,
        credential: &Credential,
        window: TimeWindow,
        query: &ClickReportQuery,
        cancel: &CancelSignal,
    ) -> FetcherResult<AggregatedResult> {
        self.run(credential, query, window, cancel).await
    }

    /// Create a tracking short link
    pub async fn generate_short_link(
        &self,
        credential: &Credential,
        mutation: &ShortLinkMutation,
        cancel: &CancelSignal,
    ) -> FetcherResult<String> {
        let body = self
            .paginator
            .execute(credential, &mutation.build(), "generateShortLink", cancel)
            .await?;

        body.pointer("/data/generateShortLink/shortLink")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                FetcherError::InvalidResponse(
                    "response has no data.generateShortLink.shortLink".to_string(),
                )
            })
    }

    /// Quota snapshot for an account
    pub async fn rate_status(&self, account_id: &str) -> RateStatus {
        self.ledger().status(account_id).await
    }

    async fn run(
        &self,
        credential: &Credential,
        query: &dyn QueryBuilder,
        window: TimeWindow,
        cancel: &CancelSignal,
    ) -> FetcherResult<AggregatedResult> {
        let metrics = ReportMetrics::start(query.report_field());
        match self.paginator.fetch_all(credential, query, window, cancel).await {
            Ok(result) => {
                metrics.record_success(result.len(), result.pages_fetched, result.truncated);
                Ok(result)
            }
            Err(e) => {
                metrics.record_failure(e.kind());
                Err(e)
            }
        }
    }
}
