//! Operational metrics for the reporting pipeline
//!
//! Tracks upstream calls, throttling, retries, quota consumption and cache
//! effectiveness through the `metrics` facade. A Prometheus scrape endpoint
//! is installed by [`init_metrics`]; without it every recording call is a
//! no-op.

use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

static CORRELATION_COUNTER: Lazy<AtomicU64> = Lazy::new(|| AtomicU64::new(0));

/// Install the Prometheus exporter and register metric descriptions
///
/// Idempotent: later calls return `Ok(())` without rebinding.
///
/// # Errors
/// Fails when the scrape listener cannot be installed
pub fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    info!(%addr, "Initializing metrics exporter");

    if let Err(e) = PrometheusBuilder::new().with_http_listener(addr).install() {
        METRICS_INITIALIZED.store(false, Ordering::SeqCst);
        return Err(format!("Failed to install Prometheus exporter: {e}").into());
    }

    describe_counter!(
        "upstream_requests_total",
        Unit::Count,
        "Signed calls sent to the upstream GraphQL endpoint"
    );
    describe_histogram!(
        "upstream_request_duration_seconds",
        Unit::Seconds,
        "Upstream call latency"
    );
    describe_counter!(
        "upstream_rate_limited_total",
        Unit::Count,
        "Upstream calls rejected as throttled"
    );
    describe_counter!("retries_total", Unit::Count, "Backoff retries scheduled");
    describe_histogram!(
        "retry_backoff_duration_seconds",
        Unit::Seconds,
        "Backoff wait before a retry"
    );
    describe_gauge!(
        "ledger_calls_used",
        Unit::Count,
        "Calls consumed in the active quota window"
    );
    describe_gauge!(
        "ledger_calls_remaining",
        Unit::Count,
        "Calls left in the active quota window"
    );
    describe_counter!(
        "ledger_refusals_total",
        Unit::Count,
        "Calls refused locally because the quota was spent"
    );
    describe_counter!(
        "ledger_degraded_total",
        Unit::Count,
        "Ledger operations served locally because the shared store failed"
    );
    describe_counter!("cache_lookups_total", Unit::Count, "Result cache lookups");
    describe_counter!("pages_fetched_total", Unit::Count, "Report pages fetched");
    describe_histogram!("page_nodes", Unit::Count, "Nodes returned per page");
    describe_counter!("reports_completed_total", Unit::Count, "Reports assembled");
    describe_counter!("reports_failed_total", Unit::Count, "Reports that failed");

    info!(%addr, "Metrics exporter initialized");
    Ok(())
}

/// Whether [`init_metrics`] has installed the exporter
pub fn is_initialized() -> bool {
    METRICS_INITIALIZED.load(Ordering::SeqCst)
}

/// New correlation ID for request tracing
pub fn generate_correlation_id() -> String {
    let id = CORRELATION_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
    format!("req-{id:08x}")
}

/// Timing and outcome for one upstream call
pub struct UpstreamRequestMetrics {
    operation: &'static str,
    start_time: Instant,
    correlation_id: String,
}

impl UpstreamRequestMetrics {
    /// Start timing a call for `operation` (the GraphQL root field, or
    /// `graphql` for proxied documents that name none we know)
    pub fn start(operation: &'static str) -> Self {
        let correlation_id = generate_correlation_id();
        debug!(correlation_id = %correlation_id, operation, "Upstream call started");

        Self {
            operation,
            start_time: Instant::now(),
            correlation_id,
        }
    }

    /// Record the classified outcome (`ok` or an error kind)
    pub fn record(&self, status: Option<u16>, outcome: &'static str) {
        let duration = self.start_time.elapsed();
        let status_label = status.map_or_else(|| "none".to_string(), |s| s.to_string());

        counter!(
            "upstream_requests_total",
            "operation" => self.operation,
            "status" => status_label,
            "outcome" => outcome,
        )
        .increment(1);
        histogram!("upstream_request_duration_seconds", "operation" => self.operation)
            .record(duration.as_secs_f64());

        if outcome == "rate_limited" {
            counter!("upstream_rate_limited_total", "operation" => self.operation).increment(1);
            warn!(
                correlation_id = %self.correlation_id,
                operation = self.operation,
                duration_ms = duration.as_millis() as u64,
                "Upstream throttled the call"
            );
        } else {
            debug!(
                correlation_id = %self.correlation_id,
                operation = self.operation,
                outcome,
                duration_ms = duration.as_millis() as u64,
                "Upstream call completed"
            );
        }
    }

    /// Correlation ID assigned to this call
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }
}

/// Record a scheduled retry
pub fn record_retry_backoff(duration: Duration, attempt: u32) {
    counter!("retries_total", "attempt" => attempt.to_string()).increment(1);
    histogram!("retry_backoff_duration_seconds").record(duration.as_secs_f64());
}

/// Record quota consumption after an admission
pub fn record_ledger_usage(used: u64, limit: u64) {
    gauge!("ledger_calls_used").set(used as f64);
    gauge!("ledger_calls_remaining").set(limit.saturating_sub(used) as f64);
}

/// Record a local refusal
pub fn record_ledger_refusal() {
    counter!("ledger_refusals_total").increment(1);
}

/// Record a fallback to the local ledger
pub fn record_ledger_degraded() {
    counter!("ledger_degraded_total").increment(1);
}

/// Record a cache lookup
pub fn record_cache_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!("cache_lookups_total", "result" => result).increment(1);
}

/// Record one fetched page
pub fn record_page(report: &'static str, nodes: usize) {
    counter!("pages_fetched_total", "report" => report).increment(1);
    histogram!("page_nodes", "report" => report).record(nodes as f64);
}

/// Outcome tracking for one report run
pub struct ReportMetrics {
    report: &'static str,
    start_time: Instant,
}

impl ReportMetrics {
    /// Start tracking a report
    pub fn start(report: &'static str) -> Self {
        Self {
            report,
            start_time: Instant::now(),
        }
    }

    /// Record a completed report
    pub fn record_success(&self, rows: usize, pages: u32, truncated: bool) {
        counter!(
            "reports_completed_total",
            "report" => self.report,
            "truncated" => truncated.to_string(),
        )
        .increment(1);

        info!(
            report = self.report,
            rows,
            pages,
            truncated,
            duration_ms = self.start_time.elapsed().as_millis() as u64,
            "Report assembled"
        );
    }

    /// Record a failed report
    pub fn record_failure(&self, kind: &'static str) {
        counter!(
            "reports_failed_total",
            "report" => self.report,
            "error" => kind,
        )
        .increment(1);

        warn!(
            report = self.report,
            error = kind,
            duration_ms = self.start_time.elapsed().as_millis() as u64,
            "Report failed"
        );
    }
}
