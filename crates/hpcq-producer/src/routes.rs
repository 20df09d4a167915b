//! `POST /jobs` / `GET /health` handlers (spec §4.2/§6.1).
//!
//! Grounded on `fourthplaces-mntogether`'s `routes/health.rs` (typed JSON
//! response built from a `State`/`Extension`-carried shared struct) and its
//! `server/app.rs` (auth as a `middleware::from_fn` layer ahead of the
//! routes, shared state passed through the whole router).

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use hpcq_queue_client::QueueError;

use crate::AppState;

#[derive(Debug, Deserialize)]
struct JobSubmission {
    input: serde_json::Value,
    #[serde(default)]
    metadata: serde_json::Value,
}

/// Rejects any request missing a matching `x-api-key` header before it
/// reaches a handler, including `/health`.
pub async fn require_api_key(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    request: axum::extract::Request,
    next: Next,
) -> Response {
    let supplied = headers.get("x-api-key").and_then(|v| v.to_str().ok());
    if supplied != Some(state.api_key.as_str()) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "unauthorized"}))).into_response();
    }
    next.run(request).await
}

pub async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"ok": true})))
}

pub async fn submit_job(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let submission: JobSubmission = match serde_json::from_slice(&body) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "rejected job submission with invalid json");
            return (StatusCode::BAD_REQUEST, Json(json!({"error": "invalid_json"}))).into_response();
        }
    };

    let job_id = hpcq_core::shortid::mint();
    let message = hpcq_core::JobMessage {
        job_id: job_id.clone(),
        input: submission.input,
        created_at: chrono::Utc::now(),
        metadata: submission.metadata,
    };

    let body = match serde_json::to_value(&message) {
        Ok(body) => body,
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize job message");
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "enqueue_failed"}))).into_response();
        }
    };

    match state.queue_client.send(&state.jobs_queue_id, body).await {
        Ok(()) => {
            tracing::info!(%job_id, "job enqueued");
            (
                StatusCode::ACCEPTED,
                Json(json!({"status": "queued", "job_id": job_id, "queue": "hpc-jobs"})),
            )
                .into_response()
        }
        Err(QueueError::RateLimited { attempts }) => {
            tracing::warn!(%job_id, attempts, "enqueue rate limited");
            let mut res = (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({"error": "enqueue_rate_limited"})),
            )
                .into_response();
            res.headers_mut().insert("Retry-After", HeaderValue::from_static("2"));
            res
        }
        Err(e) => {
            tracing::error!(%job_id, error = %e, "failed to enqueue job");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "enqueue_failed"}))).into_response()
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/jobs", axum::routing::post(submit_job))
        .route("/health", axum::routing::get(health_handler))
        .layer(axum::middleware::from_fn_with_state(state.clone(), require_api_key))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_submission_defaults_metadata_to_null() {
        let v: JobSubmission = serde_json::from_str(r#"{"input": {"command": "echo hi"}}"#).unwrap();
        assert!(v.metadata.is_null());
    }
}
