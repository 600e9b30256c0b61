//! Network tracing from agent events through to introspector queries.

mod common;

use serde_json::json;

use pagescope_engine::{Introspector, IntrospectError};
use pagescope_types::{Lookup, TraceStatus};

use common::{config, settle, FakePage};

fn dispatch(request_id: &str, url: &str, timestamp: f64) -> serde_json::Value {
    json!({
        "kind": "dispatch",
        "requestId": request_id,
        "url": url,
        "method": "get",
        "timestamp": timestamp,
        "stack": ["Error", "    at loadUsers (https://app.test/static/main.js:1:200)"],
    })
}

fn complete(url: &str, status: u16, timestamp: f64, duration_ms: f64, body: &str) -> serde_json::Value {
    json!({
        "kind": "complete",
        "url": url,
        "method": "GET",
        "status": status,
        "timestamp": timestamp,
        "durationMs": duration_ms,
        "body": body,
    })
}

#[tokio::test]
async fn test_traces_filtered_by_glob() {
    let page = FakePage::new();
    let introspector = Introspector::new(page.clone(), config());

    page.emit(dispatch("r1", "https://api.test/users", 1_000.0));
    page.emit(dispatch("r2", "https://api.test/orders/7", 1_010.0));
    page.emit(dispatch("r3", "https://cdn.test/logo.png", 1_020.0));
    settle().await;

    let api = introspector
        .network_traces(Some("https://api.test/*"))
        .await
        .unwrap();
    let urls: Vec<_> = api.iter().map(|t| t.url.as_str()).collect();
    assert_eq!(urls, ["https://api.test/users", "https://api.test/orders/7"]);
    assert!(api.iter().all(|t| t.is_pending() && t.method == "GET"));
    assert_eq!(api[0].stack.len(), 2);

    let all = introspector.network_traces(None).await.unwrap();
    assert_eq!(all.len(), 3);
}

#[tokio::test]
async fn test_same_url_requests_each_get_their_response() {
    let page = FakePage::new();
    let introspector = Introspector::new(page.clone(), config());
    let url = "https://api.test/search";

    page.emit(dispatch("r1", url, 1_000.0));
    page.emit(dispatch("r2", url, 1_400.0));
    // Second request finishes first.
    page.emit(complete(url, 200, 1_500.0, 100.0, "second"));
    page.emit(complete(url, 200, 1_800.0, 800.0, "first"));
    settle().await;

    let traces = introspector.network_traces(Some(url)).await.unwrap();
    assert_eq!(traces.len(), 2);
    let by_request = |id: &str| traces.iter().find(|t| t.request_id.as_deref() == Some(id)).unwrap();

    assert_eq!(by_request("r1").response_body.as_deref(), Some("first"));
    assert_eq!(by_request("r1").duration_ms, Some(800.0));
    assert_eq!(by_request("r2").response_body.as_deref(), Some("second"));
    assert!(traces.iter().all(|t| !t.is_pending()));
}

#[tokio::test]
async fn test_completion_before_dispatch_is_matched_later() {
    let page = FakePage::new();
    let introspector = Introspector::new(page.clone(), config());
    let url = "https://api.test/late";

    page.emit(complete(url, 201, 2_050.0, 50.0, "ok"));
    page.emit(dispatch("r9", url, 2_000.0));
    settle().await;

    let traces = introspector.network_traces(Some(url)).await.unwrap();
    assert_eq!(traces.len(), 1);
    assert_eq!(traces[0].http_status(), Some(201));
}

#[tokio::test]
async fn test_failure_and_duplicate_delivery() {
    let page = FakePage::new();
    let introspector = Introspector::new(page.clone(), config());
    let url = "https://api.test/flaky";

    page.emit(dispatch("r1", url, 500.0));
    page.emit(dispatch("r1", url, 500.0));
    let failure = json!({
        "kind": "failed",
        "url": url,
        "method": "GET",
        "timestamp": 530.0,
        "durationMs": 30.0,
        "reason": "net::ERR_CONNECTION_RESET",
    });
    page.emit(failure.clone());
    page.emit(failure);
    settle().await;

    let traces = introspector.network_traces(Some(url)).await.unwrap();
    assert_eq!(traces.len(), 1);
    assert!(traces[0].is_failure());
    match &traces[0].status {
        TraceStatus::Failed { reason, completed_at } => {
            assert_eq!(reason, "net::ERR_CONNECTION_RESET");
            assert_eq!(*completed_at, 530.0);
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_timing_breakdown_by_trace_id() {
    let page = FakePage::new();
    let introspector = Introspector::new(page.clone(), config());
    let url = "https://api.test/slow";

    page.emit(dispatch("r1", url, 10_000.0));
    let mut done = complete(url, 200, 10_090.0, 90.0, "{}");
    done["timing"] = json!({
        "startTime": 10.0,
        "domainLookupStart": 10.0,
        "domainLookupEnd": 15.0,
        "connectStart": 15.0,
        "secureConnectionStart": 20.0,
        "connectEnd": 40.0,
        "requestStart": 40.0,
        "responseStart": 90.0,
        "responseEnd": 100.0,
    });
    page.emit(done);
    settle().await;

    let trace = introspector.network_traces(Some(url)).await.unwrap().remove(0);
    let timing = introspector.timing(&trace.id).into_value().unwrap();
    assert_eq!(timing.total_ms, 90.0);
    assert_eq!(timing.lookup_ms, Some(5.0));
    assert_eq!(timing.connect_ms, Some(25.0));
    assert_eq!(timing.handshake_ms, Some(20.0));
    assert_eq!(timing.first_byte_ms, Some(50.0));
    assert_eq!(timing.transfer_ms, Some(10.0));

    assert!(matches!(introspector.timing("missing"), Lookup::NotFound { .. }));
}

#[tokio::test]
async fn test_invalid_pattern_is_an_error() {
    let page = FakePage::new();
    let introspector = Introspector::new(page, config());

    let err = introspector
        .network_traces(Some("https://api.test/[users"))
        .await
        .unwrap_err();
    match err {
        IntrospectError::InvalidPattern { pattern, .. } => {
            assert_eq!(pattern, "https://api.test/[users");
        }
        other => panic!("expected invalid pattern, got {other:?}"),
    }
}

#[tokio::test]
async fn test_malformed_events_are_ignored() {
    let page = FakePage::new();
    let introspector = Introspector::new(page.clone(), config());

    page.emit(json!({"kind": "dispatch", "url": 42}));
    page.emit(json!({"kind": "teleport"}));
    page.emit(dispatch("r1", "https://api.test/users", 1.0));
    settle().await;

    assert_eq!(introspector.network_traces(None).await.unwrap().len(), 1);
}
