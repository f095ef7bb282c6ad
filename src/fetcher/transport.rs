//! Upstream HTTP transport
//!
//! [`HttpTransport`] sends exactly one signed POST per call and classifies
//! the reply with [`classify_response`]. It never retries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::fetcher::config::{DEFAULT_ENDPOINT, RATE_LIMIT_ERROR_CODE};
use crate::fetcher::shared_resources::global_http_client;
use crate::fetcher::{FetcherError, FetcherResult, SignedRequest, Transport};
use crate::metrics::UpstreamRequestMetrics;

const RATE_LIMIT_PHRASES: [&str; 2] = ["rate limit", "traffic limiting"];

/// reqwest-backed [`Transport`]
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Arc<Client>,
    endpoint: String,
    clock: Arc<dyn Clock>,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(DEFAULT_ENDPOINT)
    }
}

impl HttpTransport {
    /// Transport for `endpoint` using the shared HTTP client
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: global_http_client(),
            endpoint: endpoint.into(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Use a specific HTTP client
    pub fn with_client(mut self, client: Arc<Client>) -> Self {
        self.client = client;
        self
    }

    /// Clock used to resolve HTTP-date `Retry-After` values
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Configured endpoint
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn send(&self, request: &SignedRequest) -> FetcherResult<(StatusCode, HeaderMap, String)> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, request.authorization_header())
            .body(request.payload().to_string())
            .send()
            .await
            .map_err(|e| FetcherError::TransportError(describe_reqwest_error(&e)))?;

        let status = response.status();
        let headers = response.headers().clone();
        let text = response
            .text()
            .await
            .map_err(|e| FetcherError::TransportError(format!("failed to read response body: {e}")))?;

        Ok((status, headers, text))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn call(&self, request: &SignedRequest) -> FetcherResult<Value> {
        let metrics = UpstreamRequestMetrics::start(request.operation());

        let (status, headers, text) = match self.send(request).await {
            Ok(parts) => parts,
            Err(e) => {
                metrics.record(None, e.kind());
                return Err(e);
            }
        };

        let retry_after = headers
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| parse_retry_after(v, self.clock.now()));

        let body = serde_json::from_str::<Value>(&text).ok();
        if body.is_none() {
            debug!(status = status.as_u16(), len = text.len(), "Upstream body is not JSON");
        }

        let outcome = classify_response(status, retry_after, body);
        metrics.record(
            Some(status.as_u16()),
            outcome.as_ref().err().map_or("ok", FetcherError::kind),
        );
        outcome
    }
}

/// Classify an upstream reply into success or exactly one failure kind
///
/// Throttling is detected first (HTTP 429, error code 10030, or rate-limit
/// phrasing in any error message), then non-success statuses, then any
/// other embedded GraphQL error.
pub fn classify_response(
    status: StatusCode,
    retry_after: Option<Duration>,
    body: Option<Value>,
) -> FetcherResult<Value> {
    let errors = body
        .as_ref()
        .and_then(|b| b.get("errors"))
        .and_then(Value::as_array)
        .filter(|errors| !errors.is_empty());

    if status == StatusCode::TOO_MANY_REQUESTS {
        let message = errors
            .and_then(|errors| first_message(errors))
            .unwrap_or_else(|| "HTTP 429 Too Many Requests".to_string());
        return Err(FetcherError::RateLimited {
            message,
            retry_after,
        });
    }

    if let Some(errors) = errors {
        if let Some(throttled) = errors.iter().find(|e| is_rate_limit_error(e)) {
            return Err(FetcherError::RateLimited {
                message: error_message(throttled),
                retry_after,
            });
        }
    }

    if !status.is_success() {
        return Err(FetcherError::UpstreamStatus {
            status: status.as_u16(),
            body,
        });
    }

    let first_error = errors.map(|errors| (error_code(&errors[0]), error_message(&errors[0])));

    match (body, first_error) {
        (None, _) => Err(FetcherError::InvalidResponse(
            "upstream returned a non-JSON body".to_string(),
        )),
        (Some(body), Some((code, message))) => Err(FetcherError::ApplicationError {
            code,
            message,
            body: Some(body),
        }),
        (Some(body), None) => Ok(body),
    }
}

/// Parse a `Retry-After` value given in seconds or as an HTTP date
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

fn is_rate_limit_error(error: &Value) -> bool {
    if error_code(error) == Some(RATE_LIMIT_ERROR_CODE) {
        return true;
    }
    let message = error_message(error).to_lowercase();
    RATE_LIMIT_PHRASES.iter().any(|p| message.contains(p))
}

fn error_code(error: &Value) -> Option<i64> {
    let code = error.get("extensions")?.get("code")?;
    code.as_i64()
        .or_else(|| code.as_str().and_then(|s| s.parse().ok()))
}

fn error_message(error: &Value) -> String {
    error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown upstream error")
        .to_string()
}

fn first_message(errors: &[Value]) -> Option<String> {
    errors
        .first()
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn describe_reqwest_error(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        format!("request timed out: {err}")
    } else if err.is_connect() {
        format!("connection failed: {err}")
    } else {
        format!("request failed: {err}")
    }
}
