//! End-to-end: `ResilientOutboundClient` against a real local upstream that
//! fails until a flag flips (spec.md §8 "Circuit trip and recovery").

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use svc_core::ErrorKind;
use svc_resilience::{CircuitBreakerConfig, OutboundRequest, ResilientOutboundClient, RetryConfig};
use tokio::net::TcpListener;
use tokio::time::Instant;

async fn spawn_flaky_upstream() -> (String, Arc<AtomicBool>) {
    let healthy = Arc::new(AtomicBool::new(false));
    let flag = healthy.clone();

    let app = axum::Router::new().route(
        "/ping",
        get(move || {
            let flag = flag.clone();
            async move {
                if flag.load(Ordering::SeqCst) {
                    (StatusCode::OK, "pong").into_response()
                } else {
                    (StatusCode::SERVICE_UNAVAILABLE, "down").into_response()
                }
            }
        }),
    );

    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service()).await.unwrap();
    });
    (format!("http://{addr}/ping"), healthy)
}

#[tokio::test]
async fn breaker_opens_on_sustained_failure_then_closes_after_upstream_recovers() {
    let (url, healthy) = spawn_flaky_upstream().await;

    let retry = RetryConfig::builder().max_retries(0).build();
    let circuit = CircuitBreakerConfig {
        failure_threshold: 3,
        success_threshold: 2,
        open_timeout: Duration::from_millis(50),
    };
    let client = ResilientOutboundClient::with_config("circuit-e2e", retry, circuit);

    // Three failing calls trip the breaker open.
    for _ in 0..3 {
        let deadline = Instant::now() + Duration::from_secs(2);
        let err = client
            .do_request(OutboundRequest::get(url.clone(), deadline))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transient);
    }

    let deadline = Instant::now() + Duration::from_secs(2);
    let err = client
        .do_request(OutboundRequest::get(url.clone(), deadline))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CircuitOpen);

    // The upstream recovers, but the breaker stays open until its timeout
    // elapses and lets a half-open probe through.
    healthy.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(60)).await;

    // success_threshold successes in half-open close the breaker.
    for _ in 0..2 {
        let deadline = Instant::now() + Duration::from_secs(2);
        let response = client
            .do_request(OutboundRequest::get(url.clone(), deadline))
            .await
            .unwrap();
        assert_eq!(response.status, 200);
    }

    let deadline = Instant::now() + Duration::from_secs(2);
    let response = client
        .do_request(OutboundRequest::get(url, deadline))
        .await
        .unwrap();
    assert_eq!(response.status, 200);
}
