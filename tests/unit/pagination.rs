//! Paginator behaviour: retries, cursors, page cap, quota and cancellation

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use affiliate_reporting::cancel::CancelSignal;
use affiliate_reporting::clock::FixedRandom;
use affiliate_reporting::fetcher::{ConversionReportQuery, FetcherError, Paginator};
use affiliate_reporting::ledger::{LedgerConfig, RateLedger};

use crate::support::{conversion_ids, credential, page, throttled, window, ScriptedTransport};

const FIELD: &str = "conversionReport";

fn paginator(transport: &Arc<ScriptedTransport>, ledger: Arc<RateLedger>) -> Paginator {
    Paginator::new(transport.clone(), ledger).with_random(Arc::new(FixedRandom(0.0)))
}

fn local_ledger() -> Arc<RateLedger> {
    Arc::new(RateLedger::new())
}

#[tokio::test(start_paused = true)]
async fn test_persistent_throttling_gives_up_after_five_attempts() {
    let transport = Arc::new(ScriptedTransport::always(Err(throttled())));
    let paginator = paginator(&transport, local_ledger());
    let started = Instant::now();

    let result = paginator
        .fetch_all(
            &credential(),
            &ConversionReportQuery::new(),
            window(),
            &CancelSignal::new(),
        )
        .await;

    assert!(matches!(result, Err(FetcherError::RateLimited { .. })));
    assert_eq!(transport.calls(), 5);

    // 1s + 2s + 4s + 8s with zero jitter
    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(15), "waited {waited:?}");
    assert!(waited < Duration::from_secs(16), "waited {waited:?}");
}

#[tokio::test(start_paused = true)]
async fn test_throttled_attempts_still_consume_quota() {
    let transport = Arc::new(ScriptedTransport::new([
        Err(throttled()),
        Ok(page(FIELD, &[1], None)),
    ]));
    let ledger = local_ledger();
    let paginator = paginator(&transport, ledger.clone());

    let result = paginator
        .fetch_all(
            &credential(),
            &ConversionReportQuery::new(),
            window(),
            &CancelSignal::new(),
        )
        .await
        .unwrap();

    assert_eq!(conversion_ids(&result.nodes), vec![1]);
    assert_eq!(transport.calls(), 2);
    assert_eq!(ledger.status(credential().account_id()).await.used, 2);
}

#[tokio::test(start_paused = true)]
async fn test_retry_after_hint_sets_the_wait() {
    let transport = Arc::new(ScriptedTransport::new([
        Err(FetcherError::RateLimited {
            message: "rate limit".to_string(),
            retry_after: Some(Duration::from_secs(30)),
        }),
        Ok(page(FIELD, &[1], None)),
    ]));
    let paginator = paginator(&transport, local_ledger());
    let started = Instant::now();

    paginator
        .fetch_all(
            &credential(),
            &ConversionReportQuery::new(),
            window(),
            &CancelSignal::new(),
        )
        .await
        .unwrap();

    assert!(started.elapsed() >= Duration::from_secs(30));
    assert!(started.elapsed() < Duration::from_secs(31));
}

#[tokio::test(start_paused = true)]
async fn test_application_error_is_not_retried() {
    let transport = Arc::new(ScriptedTransport::always(Err(
        FetcherError::ApplicationError {
            code: Some(10020),
            message: "Invalid signature".to_string(),
            body: None,
        },
    )));
    let paginator = paginator(&transport, local_ledger());

    let result = paginator
        .fetch_all(
            &credential(),
            &ConversionReportQuery::new(),
            window(),
            &CancelSignal::new(),
        )
        .await;

    assert!(matches!(
        result,
        Err(FetcherError::ApplicationError { code: Some(10020), .. })
    ));
    assert_eq!(transport.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_transport_error_is_not_retried() {
    let transport = Arc::new(ScriptedTransport::always(Err(FetcherError::TransportError(
        "connection reset".to_string(),
    ))));
    let paginator = paginator(&transport, local_ledger());

    let result = paginator
        .fetch_all(
            &credential(),
            &ConversionReportQuery::new(),
            window(),
            &CancelSignal::new(),
        )
        .await;

    assert!(matches!(result, Err(FetcherError::TransportError(_))));
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_pages_are_concatenated_in_order() {
    let transport = Arc::new(ScriptedTransport::new([
        Ok(page(FIELD, &[1, 2], Some("c1"))),
        Ok(page(FIELD, &[3], None)),
    ]));
    let paginator = paginator(&transport, local_ledger());

    let result = paginator
        .fetch_all(
            &credential(),
            &ConversionReportQuery::new(),
            window(),
            &CancelSignal::new(),
        )
        .await
        .unwrap();

    assert_eq!(conversion_ids(&result.nodes), vec![1, 2, 3]);
    assert_eq!(result.pages_fetched, 2);
    assert!(!result.truncated);
    assert_eq!(transport.calls(), 2);

    let requests = transport.requests();
    assert!(requests[0].payload().contains(r#"scrollId: \"\""#));
    assert!(requests[1].payload().contains(r#"scrollId: \"c1\""#));
    assert!(requests.iter().all(|r| r.operation() == "conversionReport"));
}

#[tokio::test]
async fn test_empty_first_page() {
    let transport = Arc::new(ScriptedTransport::new([Ok(page(FIELD, &[], None))]));
    let paginator = paginator(&transport, local_ledger());

    let result = paginator
        .fetch_all(
            &credential(),
            &ConversionReportQuery::new(),
            window(),
            &CancelSignal::new(),
        )
        .await
        .unwrap();

    assert!(result.is_empty());
    assert_eq!(result.pages_fetched, 1);
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_page_cap_stops_endless_cursor() {
    let transport = Arc::new(ScriptedTransport::always(Ok(page(FIELD, &[7], Some("same")))));
    let paginator = paginator(&transport, local_ledger());

    let result = paginator
        .fetch_all(
            &credential(),
            &ConversionReportQuery::new(),
            window(),
            &CancelSignal::new(),
        )
        .await
        .unwrap();

    assert_eq!(transport.calls(), 100);
    assert_eq!(result.pages_fetched, 100);
    assert_eq!(result.len(), 100);
    assert!(result.truncated);
}

#[tokio::test]
async fn test_custom_page_cap() {
    let transport = Arc::new(ScriptedTransport::always(Ok(page(FIELD, &[7], Some("next")))));
    let paginator = paginator(&transport, local_ledger()).with_max_pages(3);

    let result = paginator
        .fetch_all(
            &credential(),
            &ConversionReportQuery::new(),
            window(),
            &CancelSignal::new(),
        )
        .await
        .unwrap();

    assert_eq!(transport.calls(), 3);
    assert!(result.truncated);
}

#[tokio::test]
async fn test_spent_quota_refuses_without_network_call() {
    let transport = Arc::new(ScriptedTransport::always(Ok(page(FIELD, &[1], Some("next")))));
    let ledger = Arc::new(RateLedger::new().with_config(LedgerConfig {
        quota: 2,
        ..LedgerConfig::default()
    }));
    let paginator = paginator(&transport, ledger);

    let result = paginator
        .fetch_all(
            &credential(),
            &ConversionReportQuery::new(),
            window(),
            &CancelSignal::new(),
        )
        .await;

    match result {
        Err(FetcherError::LocalQuotaExceeded { used, limit, .. }) => {
            assert_eq!(used, 2);
            assert_eq!(limit, 2);
        }
        other => panic!("expected local refusal, got {other:?}"),
    }
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn test_cancelled_before_start_makes_no_calls() {
    let transport = Arc::new(ScriptedTransport::always(Ok(page(FIELD, &[1], None))));
    let paginator = paginator(&transport, local_ledger());
    let cancel = CancelSignal::new();
    cancel.cancel();

    let result = paginator
        .fetch_all(&credential(), &ConversionReportQuery::new(), window(), &cancel)
        .await;

    assert!(matches!(result, Err(FetcherError::Cancelled)));
    assert_eq!(transport.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_interrupts_backoff_wait() {
    let transport = Arc::new(ScriptedTransport::always(Err(throttled())));
    let paginator = paginator(&transport, local_ledger());
    let cancel = CancelSignal::shared();

    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            cancel.cancel();
        }
    });

    let started = Instant::now();
    let result = paginator
        .fetch_all(&credential(), &ConversionReportQuery::new(), window(), &cancel)
        .await;

    assert!(matches!(result, Err(FetcherError::Cancelled)));
    assert_eq!(transport.calls(), 1);
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_missing_report_field_is_invalid_response() {
    let transport = Arc::new(ScriptedTransport::new([Ok(json!({ "data": {} }))]));
    let paginator = paginator(&transport, local_ledger());

    let result = paginator
        .fetch_all(
            &credential(),
            &ConversionReportQuery::new(),
            window(),
            &CancelSignal::new(),
        )
        .await;

    assert!(matches!(result, Err(FetcherError::InvalidResponse(_))));
}

#[tokio::test(start_paused = true)]
async fn test_retries_resign_the_same_body() {
    let transport = Arc::new(ScriptedTransport::new([
        Err(throttled()),
        Ok(page(FIELD, &[1], None)),
    ]));
    let paginator = paginator(&transport, local_ledger());

    paginator
        .fetch_all(
            &credential(),
            &ConversionReportQuery::new(),
            window(),
            &CancelSignal::new(),
        )
        .await
        .unwrap();

    let requests = transport.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].payload(), requests[1].payload());
    assert!(requests[1]
        .authorization_header()
        .starts_with("SHA256 Credential=1234567890, Timestamp="));
}
