//! Request signing
//!
//! The upstream verifies `SHA256(accountId + timestamp + payload + secret)`
//! rendered as lowercase hex. The concatenation order and the exact payload
//! bytes are part of the wire contract.

use sha2::{Digest, Sha256};

use crate::fetcher::query::{GraphqlPayload, UNKNOWN_OPERATION};
use crate::fetcher::FetcherResult;
use crate::Credential;

/// Compute the request signature as lowercase hex
pub fn sign(account_id: &str, secret: &str, payload: &str, timestamp_seconds: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(account_id.as_bytes());
    hasher.update(timestamp_seconds.to_string().as_bytes());
    hasher.update(payload.as_bytes());
    hasher.update(secret.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A payload signed for one attempt
///
/// Retries build a fresh `SignedRequest` because the timestamp changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequest {
    account_id: String,
    timestamp_seconds: i64,
    payload: String,
    signature: String,
    operation: &'static str,
}

impl SignedRequest {
    /// Serialize `payload` and sign it
    pub fn new(
        credential: &Credential,
        payload: &GraphqlPayload,
        timestamp_seconds: i64,
    ) -> FetcherResult<Self> {
        let body = payload.to_body()?;
        Ok(Self::from_body(credential, body, timestamp_seconds))
    }

    /// Sign an already-serialized request body
    pub fn from_body(credential: &Credential, body: String, timestamp_seconds: i64) -> Self {
        let signature = sign(
            credential.account_id(),
            credential.secret(),
            &body,
            timestamp_seconds,
        );

        Self {
            account_id: credential.account_id().to_string(),
            timestamp_seconds,
            payload: body,
            signature,
            operation: UNKNOWN_OPERATION,
        }
    }

    /// Label the request with its GraphQL root field
    pub fn with_operation(mut self, operation: &'static str) -> Self {
        self.operation = operation;
        self
    }

    /// GraphQL root field, or `graphql` when unknown
    pub fn operation(&self) -> &'static str {
        self.operation
    }

    /// `Authorization` header value
    pub fn authorization_header(&self) -> String {
        format!(
            "SHA256 Credential={}, Timestamp={}, Signature={}",
            self.account_id, self.timestamp_seconds, self.signature
        )
    }

    /// Account the request was signed for
    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// Signing timestamp (Unix seconds)
    pub fn timestamp_seconds(&self) -> i64 {
        self.timestamp_seconds
    }

    /// Exact body bytes that were signed
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Lowercase hex signature
    pub fn signature(&self) -> &str {
        &self.signature
    }
}
