//! Retry log lines and user-facing guidance.
//!
//! Rate-limit failures (local or upstream) get actionable "wait N minutes"
//! guidance; everything else gets a generic retry suggestion.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::fetcher::FetcherError;
use crate::TimeWindow;

/// Classification of failures for user messaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryErrorType {
    /// Upstream throttled the call
    RateLimit,
    /// Local quota already spent
    QuotaExhausted,
    /// Upstream rejected the query or credentials
    Rejected(Option<i64>),
    /// Network failure or non-success HTTP status
    Network,
    /// Bad credential or query parameters
    InvalidInput,
    /// Response did not have the expected shape
    BadResponse,
    /// Caller gave up
    Cancelled,
}

impl RetryErrorType {
    /// Classify a pipeline error.
    pub fn from_error(err: &FetcherError) -> Self {
        match err {
            FetcherError::RateLimited { .. } => Self::RateLimit,
            FetcherError::LocalQuotaExceeded { .. } => Self::QuotaExhausted,
            FetcherError::ApplicationError { code, .. } => Self::Rejected(*code),
            FetcherError::TransportError(_) | FetcherError::UpstreamStatus { .. } => {
                Self::Network
            }
            FetcherError::InvalidCredential(_) | FetcherError::InvalidQuery(_) => Self::InvalidInput,
            FetcherError::InvalidResponse(_) => Self::BadResponse,
            FetcherError::Cancelled => Self::Cancelled,
        }
    }

    /// Short description used inside retry log messages.
    pub fn description(&self) -> &'static str {
        match self {
            Self::RateLimit => "rate limit exceeded",
            Self::QuotaExhausted => "hourly quota exhausted",
            Self::Rejected(_) => "request rejected",
            Self::Network => "network error",
            Self::InvalidInput => "invalid request",
            Self::BadResponse => "unexpected response",
            Self::Cancelled => "cancelled",
        }
    }

    /// Suggested remediation shown after a failure.
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::RateLimit | Self::QuotaExhausted => {
                "Wait for the quota window to reset or narrow the date range"
            }
            Self::Rejected(_) => "Verify the account ID, secret and query fields",
            Self::Network => "Check network connectivity and try again",
            Self::InvalidInput => "Check the credential and date range arguments",
            Self::BadResponse => "The upstream API may have changed; try again later",
            Self::Cancelled => "Run the report again when ready",
        }
    }

    /// Whether the condition is a rate limit, local or remote.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimit | Self::QuotaExhausted)
    }
}

/// Context for formatting retry messages.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Attempt that failed (1-based)
    pub attempt: u32,
    /// Maximum attempts configured
    pub max_attempts: u32,
    /// Failure class
    pub error_type: RetryErrorType,
    /// Wait before the next attempt
    pub backoff_duration: Duration,
    /// GraphQL operation being fetched
    pub operation: String,
    /// Report window, when paginating
    pub window: Option<TimeWindow>,
    /// Original error message
    pub error_message: String,
}

impl RetryContext {
    /// Build the context for a failed attempt.
    pub fn new(
        attempt: u32,
        max_attempts: u32,
        err: &FetcherError,
        backoff_duration: Duration,
        operation: impl Into<String>,
        window: Option<TimeWindow>,
    ) -> Self {
        Self {
            attempt,
            max_attempts,
            error_type: RetryErrorType::from_error(err),
            backoff_duration,
            operation: operation.into(),
            window,
            error_message: err.to_string(),
        }
    }

    /// Standard retry line with attempt counters.
    pub fn format_retry(&self) -> String {
        let mut message = format!(
            "Retrying (attempt {}/{}) after {} - waiting {:.1} seconds...",
            self.attempt,
            self.max_attempts,
            self.error_type.description(),
            self.backoff_duration.as_secs_f64()
        );
        append_operation_and_window(&mut message, &self.operation, self.window);
        message
    }

    /// Final failure summary with suggestions.
    pub fn format_failure(&self) -> String {
        let mut lines = vec![
            format!("[FAILED] Request failed after {} attempts", self.attempt),
            format!("  Last error: {}", self.error_message),
            format!("  Operation: {}", self.operation),
        ];
        if let Some(window) = self.window {
            lines.push(format!("  Window: {}", format_window(window)));
        }
        lines.push("  Suggestions:".to_string());
        lines.push(format!("    - {}", self.error_type.suggestion()));
        lines.join("\n")
    }
}

/// One-line guidance for a failed report.
///
/// Rate-limit conditions name a wait time in minutes; other errors get a
/// generic retry suggestion.
pub fn user_guidance(err: &FetcherError, now: DateTime<Utc>) -> String {
    match err {
        FetcherError::LocalQuotaExceeded {
            used,
            limit,
            reset_at,
        } => {
            let minutes = ceil_minutes((*reset_at - now).num_seconds());
            format!(
                "Hourly quota used ({used}/{limit} calls). Please wait {} before trying again.",
                plural_minutes(minutes)
            )
        }
        FetcherError::RateLimited { retry_after, .. } => {
            let minutes = retry_after.map_or(1, |d| ceil_minutes(d.as_secs() as i64));
            format!(
                "The upstream API is rate limiting this account. Please wait {} before trying again.",
                plural_minutes(minutes)
            )
        }
        FetcherError::Cancelled => "The report was cancelled.".to_string(),
        other => format!(
            "{}: {other}. {}.",
            capitalize(RetryErrorType::from_error(other).description()),
            RetryErrorType::from_error(other).suggestion()
        ),
    }
}

fn ceil_minutes(seconds: i64) -> i64 {
    ((seconds.max(0) + 59) / 60).max(1)
}

fn plural_minutes(minutes: i64) -> String {
    if minutes == 1 {
        "1 minute".to_string()
    } else {
        format!("{minutes} minutes")
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn append_operation_and_window(buffer: &mut String, operation: &str, window: Option<TimeWindow>) {
    if !operation.is_empty() {
        buffer.push_str(&format!(" ({operation})"));
    }
    if let Some(window) = window {
        buffer.push(' ');
        buffer.push_str(&format_window(window));
    }
}

fn format_window(window: TimeWindow) -> String {
    let day = |secs: i64| {
        DateTime::<Utc>::from_timestamp(secs, 0)
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| secs.to_string())
    };
    format!("{} to {}", day(window.start), day(window.end))
}
