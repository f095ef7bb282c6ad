//! Pipeline configuration constants

/// Production GraphQL endpoint
pub const DEFAULT_ENDPOINT: &str = "https://open-api.affiliate.shopee.co.th/graphql";

/// HTTP connect timeout (seconds)
pub const HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Overall HTTP request timeout (seconds)
pub const HTTP_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Rows requested per page when the caller does not choose
pub const DEFAULT_PAGE_LIMIT: u32 = 100;

/// Largest page size the upstream accepts
pub const MAX_PAGE_LIMIT: u32 = 500;

/// Pages fetched before a report is returned as truncated.
/// At the default page size this is 10,000 rows.
pub const MAX_PAGES: u32 = 100;

/// Retries after the first attempt; five attempts in total.
pub const MAX_RETRIES: u32 = 4;

/// First backoff delay in milliseconds.
pub const INITIAL_BACKOFF_MS: u64 = 1_000;

/// Backoff ceiling in milliseconds, reached on the fifth attempt.
pub const MAX_BACKOFF_MS: u64 = 16_000;

/// Jitter as a fraction of the computed delay.
pub const BACKOFF_JITTER: f64 = 0.25;

/// Application error code the upstream uses for throttling
pub const RATE_LIMIT_ERROR_CODE: i64 = 10030;
