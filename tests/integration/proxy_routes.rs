//! Proxy routes exercised in-process with tower's oneshot

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use affiliate_reporting::clock::MockClock;
use affiliate_reporting::fetcher::FetcherError;
use affiliate_reporting::ledger::{LedgerConfig, RateLedger};
use affiliate_reporting::proxy::{router, ProxyState};

use crate::support::{throttled, ScriptedTransport};

const T0: i64 = 1_704_067_200;

struct Harness {
    app: Router,
    transport: Arc<ScriptedTransport>,
    ledger: Arc<RateLedger>,
}

fn harness_with(transport: ScriptedTransport, config: LedgerConfig) -> Harness {
    let clock = Arc::new(MockClock::at_seconds(T0));
    let transport = Arc::new(transport);
    let ledger = Arc::new(
        RateLedger::new()
            .with_clock(clock.clone())
            .with_config(config),
    );
    let state = ProxyState::new(transport.clone(), ledger.clone()).with_clock(clock);

    Harness {
        app: router(state),
        transport,
        ledger,
    }
}

fn harness(transport: ScriptedTransport) -> Harness {
    harness_with(transport, LedgerConfig::default())
}

fn post_json(body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/api/conversion-report")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn valid_body() -> Value {
    json!({
        "accountId": "1234567890",
        "secret": "test-secret",
        "query": "{ conversionReport(limit: 1) { nodes { conversionId } } }"
    })
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn test_success_passes_upstream_body_through() {
    let upstream = json!({ "data": { "conversionReport": { "nodes": [{ "conversionId": 1 }] } } });
    let h = harness(ScriptedTransport::always(Ok(upstream.clone())));

    let (status, body) = send(&h.app, post_json(valid_body())).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, upstream);
    assert_eq!(h.transport.calls(), 1);
    assert_eq!(h.ledger.status("1234567890").await.used, 1);

    let request = &h.transport.requests()[0];
    assert_eq!(request.account_id(), "1234567890");
    assert_eq!(request.timestamp_seconds(), T0);
    assert_eq!(
        request.payload(),
        json!({ "query": valid_body()["query"] }).to_string()
    );
}

#[tokio::test]
async fn test_app_id_alias_is_accepted() {
    let h = harness(ScriptedTransport::always(Ok(json!({ "data": {} }))));

    let (status, _) = send(
        &h.app,
        post_json(json!({ "appId": "42", "secret": "s", "query": "{ a }" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.transport.requests()[0].account_id(), "42");
}

#[tokio::test]
async fn test_missing_fields_are_rejected_before_any_call() {
    let h = harness(ScriptedTransport::always(Ok(json!({ "data": {} }))));

    for body in [
        json!({ "accountId": "1", "query": "{ a }" }),
        json!({ "accountId": "1", "secret": "", "query": "{ a }" }),
        json!({ "secret": "s", "query": "{ a }" }),
        json!({ "accountId": "1", "secret": "s" }),
        json!({}),
    ] {
        let (status, response) = send(&h.app, post_json(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response["error"], "Missing accountId, secret, or query");
    }

    assert_eq!(h.transport.calls(), 0);
    assert_eq!(h.ledger.status("1").await.used, 0);
}

#[tokio::test]
async fn test_malformed_json_is_bad_request() {
    let h = harness(ScriptedTransport::always(Ok(json!({ "data": {} }))));
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/conversion-report")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();

    let (status, body) = send(&h.app, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Malformed request body");
    assert_eq!(h.transport.calls(), 0);
}

#[tokio::test]
async fn test_other_methods_are_not_allowed() {
    let h = harness(ScriptedTransport::always(Ok(json!({ "data": {} }))));

    for method in [Method::GET, Method::PUT, Method::DELETE] {
        let request = Request::builder()
            .method(method)
            .uri("/api/conversion-report")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&h.app, request).await;

        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(body, json!({ "error": "Method Not Allowed" }));
    }
}

#[tokio::test]
async fn test_graphql_errors_pass_through_as_ok() {
    let upstream = json!({ "errors": [{ "message": "Invalid Signature", "extensions": { "code": 10020 } }] });
    let h = harness(ScriptedTransport::always(Err(FetcherError::ApplicationError {
        code: Some(10020),
        message: "Invalid Signature".to_string(),
        body: Some(upstream.clone()),
    })));

    let (status, body) = send(&h.app, post_json(valid_body())).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, upstream);
}

#[tokio::test]
async fn test_upstream_throttling_is_429_without_retry() {
    let h = harness(ScriptedTransport::always(Err(throttled())));

    let (status, body) = send(&h.app, post_json(valid_body())).await;

    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "Rate limit exceeded");
    assert_eq!(body["code"], 10030);
    assert_eq!(body["source"], "upstream");
    assert!(body["message"].as_str().unwrap().contains("2000 requests per hour"));
    assert_eq!(
        body["details"]["message"],
        "Too many requests, traffic limiting"
    );
    assert_eq!(h.transport.calls(), 1);
}

#[tokio::test]
async fn test_transport_failure_is_500() {
    let h = harness(ScriptedTransport::always(Err(FetcherError::TransportError(
        "connection failed: refused".to_string(),
    ))));

    let (status, body) = send(&h.app, post_json(valid_body())).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "transport error: connection failed: refused");
    assert!(body.get("details").is_some());
}

#[tokio::test]
async fn test_upstream_error_status_body_is_returned_as_details() {
    let upstream = json!({ "errors": [{ "message": "Internal error", "extensions": { "code": 10000 } }] });
    let h = harness(ScriptedTransport::always(Err(FetcherError::UpstreamStatus {
        status: 500,
        body: Some(upstream.clone()),
    })));

    let (status, body) = send(&h.app, post_json(valid_body())).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Upstream returned HTTP 500");
    assert_eq!(body["details"], upstream);
    assert_eq!(h.transport.calls(), 1);
}

#[tokio::test]
async fn test_spent_quota_is_refused_locally() {
    let h = harness_with(
        ScriptedTransport::always(Ok(json!({ "data": {} }))),
        LedgerConfig {
            quota: 1,
            ..LedgerConfig::default()
        },
    );

    let (first, _) = send(&h.app, post_json(valid_body())).await;
    let (second, body) = send(&h.app, post_json(valid_body())).await;

    assert_eq!(first, StatusCode::OK);
    assert_eq!(second, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["source"], "local");
    assert_eq!(body["code"], 10030);
    assert_eq!(body["retryAfter"], 3600);
    assert_eq!(h.transport.calls(), 1);
}

#[tokio::test]
async fn test_rate_status_route() {
    let h = harness(ScriptedTransport::always(Ok(json!({ "data": {} }))));
    send(&h.app, post_json(valid_body())).await;

    let request = Request::builder()
        .uri("/api/rate-status?accountId=1234567890")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&h.app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["used"], 1);
    assert_eq!(body["remaining"], 1999);
    assert_eq!(body["mode"], "local");

    let missing = Request::builder()
        .uri("/api/rate-status")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&h.app, missing).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_request_history_route_groups_by_operation() {
    let h = harness(ScriptedTransport::always(Ok(json!({ "data": {} }))));
    send(&h.app, post_json(valid_body())).await;
    send(&h.app, post_json(valid_body())).await;

    let mut clicks = valid_body();
    clicks["query"] = json!("{ clickReport(limit: 1) { nodes { clickTime } } }");
    send(&h.app, post_json(clicks)).await;

    let request = Request::builder()
        .uri("/api/request-history?accountId=1234567890&limit=2")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&h.app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["recent"].as_array().unwrap().len(), 2);
    assert_eq!(body["recent"][0]["operation"], "clickReport");
    assert_eq!(body["recent"][0]["count"], 3);
    assert_eq!(body["stats"]["total"], 3);
    assert_eq!(body["stats"]["byOperation"]["conversionReport"], 2);
    assert_eq!(body["stats"]["byOperation"]["clickReport"], 1);

    let missing = Request::builder()
        .uri("/api/request-history")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&h.app, missing).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_health() {
    let h = harness(ScriptedTransport::default());
    let response = h
        .app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"ok");
}

#[tokio::test]
async fn test_cors_preflight() {
    let h = harness(ScriptedTransport::default());
    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/api/conversion-report")
        .header(header::ORIGIN, "https://dashboard.example")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .body(Body::empty())
        .unwrap();

    let response = h.app.clone().oneshot(request).await.unwrap();

    assert!(response.status().is_success());
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "*"
    );
    let methods = response.headers()[header::ACCESS_CONTROL_ALLOW_METHODS]
        .to_str()
        .unwrap()
        .to_string();
    assert!(methods.contains("POST"));
    assert!(methods.contains("OPTIONS"));
    assert_eq!(h.transport.calls(), 0);
}
