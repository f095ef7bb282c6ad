//! Upstream request pipeline
//!
//! - [`signer`] - SHA-256 request signing and the `Authorization` header
//! - [`query`] - Typed GraphQL payload builders
//! - [`transport`] - One signed HTTP call plus outcome classification
//! - [`backoff`] - Retry decisions and delays for throttled calls
//! - [`pagination`] - Cursor-driven aggregation over all pages
//! - [`retry_formatter`] - Retry log lines and user guidance

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

pub mod backoff;
pub mod config;
pub mod pagination;
pub mod query;
pub mod retry_formatter;
pub mod shared_resources;
pub mod signer;
pub mod transport;

pub use backoff::{BackoffPolicy, RetryDecision};
pub use pagination::Paginator;
pub use query::{ClickReportQuery, ConversionReportQuery, GraphqlPayload, QueryBuilder, ShortLinkMutation};
pub use signer::{sign, SignedRequest};
pub use transport::HttpTransport;

/// Pipeline errors
///
/// Only [`FetcherError::RateLimited`] is retried. Every other kind is
/// surfaced to the caller unchanged.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetcherError {
    /// Upstream throttled the call (HTTP 429, code 10030 or rate-limit phrasing)
    #[error("rate limited by upstream: {message}")]
    RateLimited {
        /// Upstream message
        message: String,
        /// Explicit wait requested by the upstream
        retry_after: Option<Duration>,
    },

    /// Upstream rejected the query or the credentials
    #[error("application error: {message}")]
    ApplicationError {
        /// GraphQL `extensions.code`, when present
        code: Option<i64>,
        /// First error message
        message: String,
        /// Full upstream body, kept for passthrough
        body: Option<serde_json::Value>,
    },

    /// Network or connection failure
    #[error("transport error: {0}")]
    TransportError(String),

    /// Upstream answered with a non-success status other than 429
    #[error("transport error: upstream returned HTTP {status}")]
    UpstreamStatus {
        /// HTTP status code
        status: u16,
        /// Upstream body, when it was JSON
        body: Option<serde_json::Value>,
    },

    /// Refused locally before any network attempt
    #[error("local quota exceeded: {used}/{limit} calls used, window resets at {reset_at}")]
    LocalQuotaExceeded {
        /// Calls consumed in the active window
        used: u64,
        /// Quota ceiling
        limit: u64,
        /// End of the active window
        reset_at: DateTime<Utc>,
    },

    /// Credential failed validation
    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    /// Query parameters failed validation
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Successful response with an unexpected shape
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The caller abandoned the run
    #[error("report cancelled")]
    Cancelled,
}

impl FetcherError {
    /// Whether the error is a rate-limit condition, local or remote
    pub fn is_rate_limited(&self) -> bool {
        matches!(
            self,
            FetcherError::RateLimited { .. } | FetcherError::LocalQuotaExceeded { .. }
        )
    }

    /// Whether the backoff engine may retry this error
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetcherError::RateLimited { .. })
    }

    /// Explicit retry-after hint from the upstream
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FetcherError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Short label used in metrics and structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            FetcherError::RateLimited { .. } => "rate_limited",
            FetcherError::ApplicationError { .. } => "application_error",
            FetcherError::TransportError(_) | FetcherError::UpstreamStatus { .. } => {
                "transport_error"
            }
            FetcherError::LocalQuotaExceeded { .. } => "local_quota_exceeded",
            FetcherError::InvalidCredential(_) => "invalid_credential",
            FetcherError::InvalidQuery(_) => "invalid_query",
            FetcherError::InvalidResponse(_) => "invalid_response",
            FetcherError::Cancelled => "cancelled",
        }
    }
}

/// Result type for pipeline operations
pub type FetcherResult<T> = Result<T, FetcherError>;

/// Issues one signed call to the upstream and classifies the outcome
///
/// Implementations never retry; retry orchestration belongs to the
/// paginator and [`BackoffPolicy`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send the request and return the GraphQL body on success
    ///
    /// # Errors
    /// Returns `RateLimited`, `ApplicationError`, `TransportError` or
    /// `UpstreamStatus`
    async fn call(&self, request: &SignedRequest) -> FetcherResult<serde_json::Value>;
}
