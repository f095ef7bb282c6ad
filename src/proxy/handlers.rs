use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::fetcher::query::operation_name;
use crate::fetcher::{FetcherError, GraphqlPayload, SignedRequest};
use crate::ledger::{RateStatus, RequestRecord, RequestStats};
use crate::proxy::{ProxyError, ProxyState};
use crate::Credential;

/// Body accepted by the conversion-report route
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyRequest {
    /// Account id; `appId` is accepted as well
    #[serde(alias = "appId")]
    pub account_id: Option<String>,
    /// Shared secret
    pub secret: Option<String>,
    /// GraphQL document to forward
    pub query: Option<String>,
}

impl ProxyRequest {
    fn into_parts(self) -> Result<(Credential, String), ProxyError> {
        let present = |v: Option<String>| v.filter(|s| !s.trim().is_empty());

        match (
            present(self.account_id),
            present(self.secret),
            present(self.query),
        ) {
            (Some(account_id), Some(secret), Some(query)) => {
                let credential =
                    Credential::new(account_id, secret).map_err(|_| ProxyError::MissingFields)?;
                Ok((credential, query))
            }
            _ => Err(ProxyError::MissingFields),
        }
    }
}

/// Query string of the rate-status route
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateStatusParams {
    /// Account to inspect
    #[serde(alias = "appId")]
    pub account_id: Option<String>,
}

/// Sign and forward one GraphQL document
pub async fn conversion_report(
    State(state): State<ProxyState>,
    body: Result<Json<ProxyRequest>, JsonRejection>,
) -> Result<Response, ProxyError> {
    let Json(body) = body.map_err(|rejection| match rejection {
        JsonRejection::MissingJsonContentType(_) | JsonRejection::JsonDataError(_) => {
            ProxyError::MissingFields
        }
        other => ProxyError::MalformedBody(other.body_text()),
    })?;
    let (credential, query) = body.into_parts()?;

    // Serialize before admission so a local failure never spends quota
    let operation = operation_name(&query);
    let request = SignedRequest::new(
        &credential,
        &GraphqlPayload::new(query),
        state.clock.now_seconds(),
    )
    .map_err(|e| ProxyError::from_fetcher(e, state.clock.now()))?
    .with_operation(operation);

    let admission = state
        .ledger
        .check_and_reserve_for(credential.account_id(), operation)
        .await;
    if !admission.allowed {
        return Err(ProxyError::from_fetcher(admission.refusal(), state.clock.now()));
    }

    match state.transport.call(&request).await {
        Ok(body) => {
            info!(account_id = %credential.account_id(), "Proxied query succeeded");
            Ok(Json(body).into_response())
        }
        Err(FetcherError::ApplicationError {
            body: Some(body),
            message,
            ..
        }) => {
            info!(
                account_id = %credential.account_id(),
                error = %message,
                "Upstream returned GraphQL errors, passing through"
            );
            Ok(Json(body).into_response())
        }
        Err(e) => {
            warn!(account_id = %credential.account_id(), error = %e, "Proxied query failed");
            Err(ProxyError::from_fetcher(e, state.clock.now()))
        }
    }
}

/// Quota snapshot without consuming a call
pub async fn rate_status(
    State(state): State<ProxyState>,
    Query(params): Query<RateStatusParams>,
) -> Result<Json<RateStatus>, ProxyError> {
    let account_id = params
        .account_id
        .filter(|s| !s.trim().is_empty())
        .ok_or(ProxyError::MissingAccount)?;

    Ok(Json(state.ledger.status(&account_id).await))
}

/// Query string of the request-history route
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestHistoryParams {
    /// Account to inspect
    #[serde(alias = "appId")]
    pub account_id: Option<String>,
    /// Most recent calls to list
    #[serde(default = "default_history_limit")]
    pub limit: usize,
    /// Lookback for the per-operation counts
    #[serde(default = "default_history_hours")]
    pub hours: u32,
}

fn default_history_limit() -> usize {
    10
}

fn default_history_hours() -> u32 {
    1
}

/// Calls admitted by this proxy for one account
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestHistory {
    /// Newest calls from the current window
    pub recent: Vec<RequestRecord>,
    /// Per-operation counts over the lookback
    pub stats: RequestStats,
}

/// Recent calls and per-operation counts for an account
pub async fn request_history(
    State(state): State<ProxyState>,
    Query(params): Query<RequestHistoryParams>,
) -> Result<Json<RequestHistory>, ProxyError> {
    let account_id = params
        .account_id
        .filter(|s| !s.trim().is_empty())
        .ok_or(ProxyError::MissingAccount)?;

    Ok(Json(RequestHistory {
        recent: state.ledger.recent_requests(&account_id, params.limit),
        stats: state.ledger.request_stats(&account_id, params.hours),
    }))
}

/// Plain OPTIONS request without CORS preflight headers
pub async fn options() -> StatusCode {
    StatusCode::OK
}

/// Any other method on a proxy route
pub async fn method_not_allowed() -> ProxyError {
    ProxyError::MethodNotAllowed
}

/// Liveness probe
pub async fn health() -> &'static str {
    "ok"
}
