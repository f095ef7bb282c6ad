//! CLI error types and conversions

use crate::fetcher::FetcherError;

/// Exit status for a run stopped by a local or upstream rate limit
pub const EXIT_RATE_LIMITED: i32 = 75;

/// Exit status for every other failure
pub const EXIT_FAILURE: i32 = 1;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Pipeline error
    #[error("{0}")]
    FetcherError(#[from] FetcherError),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// I/O failure, e.g. binding the proxy listener
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Output serialization failure
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl CliError {
    /// Whether the command failed on a rate-limit condition
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, CliError::FetcherError(e) if e.is_rate_limited())
    }

    /// Process exit status; rate limits get their own so scripts can retry later
    pub fn exit_code(&self) -> i32 {
        if self.is_rate_limited() {
            EXIT_RATE_LIMITED
        } else {
            EXIT_FAILURE
        }
    }
}
