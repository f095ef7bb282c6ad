use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use thiserror::Error;

use crate::fetcher::config::RATE_LIMIT_ERROR_CODE;
use crate::fetcher::FetcherError;

const RATE_LIMIT_MESSAGE: &str =
    "You have exceeded the upstream API rate limit of 2000 requests per hour";

/// Failures returned by the proxy routes
#[derive(Error, Debug)]
pub enum ProxyError {
    /// A required body field was absent or blank
    #[error("Missing accountId, secret, or query")]
    MissingFields,

    /// The request body was not valid JSON of the expected shape
    #[error("Malformed request body: {0}")]
    MalformedBody(String),

    /// Status lookup without an account
    #[error("Missing accountId")]
    MissingAccount,

    /// Wrong HTTP method on a proxy route
    #[error("Method Not Allowed")]
    MethodNotAllowed,

    /// The local ledger refused the call
    #[error("Rate limit exceeded")]
    LocalQuota {
        /// Calls used in the window
        used: u64,
        /// Quota ceiling
        limit: u64,
        /// End of the window
        reset_at: DateTime<Utc>,
        /// Seconds until the window resets
        retry_after_secs: i64,
    },

    /// The upstream throttled the call
    #[error("Rate limit exceeded")]
    UpstreamRateLimited {
        /// Upstream message
        message: String,
        /// Upstream retry hint in seconds
        retry_after_secs: Option<u64>,
    },

    /// Anything else
    #[error("{error}")]
    Internal {
        /// Error description
        error: String,
        /// Upstream body, when one was received
        details: Option<Value>,
    },
}

impl ProxyError {
    /// Map a pipeline failure; `now` resolves the local quota's retry delay
    pub fn from_fetcher(err: FetcherError, now: DateTime<Utc>) -> Self {
        match err {
            FetcherError::LocalQuotaExceeded {
                used,
                limit,
                reset_at,
            } => ProxyError::LocalQuota {
                used,
                limit,
                reset_at,
                retry_after_secs: (reset_at - now).num_seconds().max(0),
            },
            FetcherError::RateLimited {
                message,
                retry_after,
            } => ProxyError::UpstreamRateLimited {
                message,
                retry_after_secs: retry_after.map(|d| d.as_secs()),
            },
            FetcherError::InvalidCredential(_) => ProxyError::MissingFields,
            FetcherError::ApplicationError { message, body, .. } => ProxyError::Internal {
                error: message,
                details: body,
            },
            FetcherError::UpstreamStatus { status, body } => ProxyError::Internal {
                error: format!("Upstream returned HTTP {status}"),
                details: body,
            },
            other => ProxyError::Internal {
                error: other.to_string(),
                details: None,
            },
        }
    }

    /// HTTP status for this error
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::MissingFields
            | ProxyError::MalformedBody(_)
            | ProxyError::MissingAccount => StatusCode::BAD_REQUEST,
            ProxyError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ProxyError::LocalQuota { .. } | ProxyError::UpstreamRateLimited { .. } => {
                StatusCode::TOO_MANY_REQUESTS
            }
            ProxyError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self) -> Value {
        match self {
            ProxyError::MissingFields | ProxyError::MissingAccount | ProxyError::MethodNotAllowed => {
                json!({ "error": self.to_string() })
            }
            ProxyError::MalformedBody(details) => json!({
                "error": "Malformed request body",
                "details": details,
            }),
            ProxyError::LocalQuota {
                used,
                limit,
                reset_at,
                retry_after_secs,
            } => json!({
                "error": "Rate limit exceeded",
                "message": RATE_LIMIT_MESSAGE,
                "code": RATE_LIMIT_ERROR_CODE,
                "source": "local",
                "used": used,
                "limit": limit,
                "resetTime": reset_at,
                "retryAfter": retry_after_secs,
            }),
            ProxyError::UpstreamRateLimited {
                message,
                retry_after_secs,
            } => json!({
                "error": "Rate limit exceeded",
                "message": RATE_LIMIT_MESSAGE,
                "code": RATE_LIMIT_ERROR_CODE,
                "source": "upstream",
                "retryAfter": retry_after_secs,
                "details": { "message": message },
            }),
            ProxyError::Internal { error, details } => json!({
                "error": error,
                "details": details,
            }),
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}
