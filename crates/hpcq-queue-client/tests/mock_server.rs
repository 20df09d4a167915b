//! Integration tests against an in-process mock of the queue service's HTTP
//! surface (spec §4.1/§6.2), built the way `SPEC_FULL.md` §8 describes:
//! an `axum` router bound to `127.0.0.1:0` via `tokio::net::TcpListener`.
//! Covers 429 backoff-then-succeed (S7) and the ack/retry partial-failure
//! retry loop.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use hpcq_queue_client::QueueClient;
use serde_json::{json, Value};

#[derive(Default)]
struct MockState {
    send_attempts: AtomicU32,
    /// Number of leading `send` calls that should return 429 before succeeding.
    rate_limit_for: u32,
    ack_calls: std::sync::Mutex<Vec<Value>>,
}

async fn send_handler(State(state): State<Arc<MockState>>, Json(_body): Json<Value>) -> (StatusCode, Json<Value>) {
    let attempt = state.send_attempts.fetch_add(1, Ordering::SeqCst) + 1;
    if attempt <= state.rate_limit_for {
        (StatusCode::TOO_MANY_REQUESTS, Json(json!({})))
    } else {
        (StatusCode::OK, Json(json!({})))
    }
}

async fn ack_handler(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    state.ack_calls.lock().unwrap().push(body.clone());
    let lease_ids = body["lease_ids"].as_array().cloned().unwrap_or_default();
    // First call for any given lease id batch partially fails the first id,
    // succeeding on the (recursive) retry with the remainder.
    if lease_ids.len() > 1 {
        let failed = vec![lease_ids[0].clone()];
        (StatusCode::OK, Json(json!({"failed_lease_ids": failed})))
    } else {
        (StatusCode::OK, Json(json!({"failed_lease_ids": []})))
    }
}

async fn spawn_mock(state: Arc<MockState>) -> url::Url {
    let app = Router::new()
        .route("/accounts/:account_id/queues/:queue/messages/send", post(send_handler))
        .route("/accounts/:account_id/queues/:queue/messages/ack", post(ack_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    url::Url::parse(&format!("http://{addr}")).unwrap()
}

#[tokio::test]
async fn send_retries_past_rate_limit_then_succeeds() {
    let state = Arc::new(MockState {
        rate_limit_for: 2,
        ..Default::default()
    });
    let base_url = spawn_mock(state.clone()).await;

    let client = QueueClient::new(reqwest::Client::new(), base_url, "acct".to_string(), "token".to_string());
    let result = client.send("hpc-jobs", json!({"hello": "world"})).await;

    assert!(result.is_ok(), "expected send to eventually succeed: {result:?}");
    assert_eq!(state.send_attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn send_gives_up_after_five_rate_limited_attempts() {
    let state = Arc::new(MockState {
        rate_limit_for: 100,
        ..Default::default()
    });
    let base_url = spawn_mock(state.clone()).await;

    let client = QueueClient::new(reqwest::Client::new(), base_url, "acct".to_string(), "token".to_string());
    let result = client.send("hpc-jobs", json!({"hello": "world"})).await;

    assert!(matches!(result, Err(hpcq_queue_client::QueueError::RateLimited { attempts: 5 })));
    assert_eq!(state.send_attempts.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn ack_retries_partial_failures_until_clean() {
    let state = Arc::new(MockState::default());
    let base_url = spawn_mock(state.clone()).await;

    let client = QueueClient::new(reqwest::Client::new(), base_url, "acct".to_string(), "token".to_string());
    let lease_ids = vec!["lease-a".to_string(), "lease-b".to_string()];
    let result = client.ack("hpc-jobs", &lease_ids).await;

    assert!(result.is_ok(), "expected ack to converge: {result:?}");
    // First call acks both and gets lease-a back as failed; second call
    // acks just lease-a alone and succeeds outright.
    assert_eq!(state.ack_calls.lock().unwrap().len(), 2);
}
