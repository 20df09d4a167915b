#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

//! Thin HTTP adapter to the external queue service (spec §4.1/§6.2): four
//! operations — `pull`, `ack`, `retry`, `send` — base64-or-plain body
//! decoding, and 429 backoff. Exact vendor URLs are a parameter
//! (`base_url`/`account_id`); this client assumes a Cloudflare-Queues-shaped
//! REST surface, matching the `CF_*` environment variables in spec §6.3.
//!
//! Grounded on the teacher's `client-engine::backend` (one `reqwest::Client`
//! built once and reused, typed request/response DTOs, status-driven error
//! classification) and its `worker::submit_witness`/`compute_witness` retry
//! loops (attempt counters, capped sleep, de-duplicated logging).

use std::time::Duration;

use base64::Engine as _;
use rand::Rng;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use url::Url;

/// Errors a queue operation can fail with.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue service transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("queue service returned {status}: {body}")]
    Http { status: StatusCode, body: String },
    #[error("rate limited after {attempts} attempts")]
    RateLimited { attempts: u32 },
    #[error("invalid queue service url: {0}")]
    Url(#[from] url::ParseError),
}

/// A single message handed back by [`QueueClient::pull`].
#[derive(Debug, Clone)]
pub struct PulledMessage {
    pub lease_id: String,
    pub attempts: u32,
    /// `None` when the body was undecodable — a poison message the
    /// consumer must still `ack` to drain (spec §4.1).
    pub body: Option<serde_json::Value>,
    pub decode_error: Option<String>,
}

#[derive(Debug, Serialize)]
struct PullRequest {
    batch_size: u32,
    visibility_timeout_seconds: u64,
}

#[derive(Debug, Deserialize)]
struct RawPulledMessage {
    lease_id: String,
    #[serde(default)]
    attempts: u32,
    body: String,
    #[serde(default)]
    is_base64: bool,
}

#[derive(Debug, Deserialize)]
struct PullResponse {
    #[serde(default)]
    messages: Vec<RawPulledMessage>,
}

#[derive(Debug, Serialize)]
struct AckRequest<'a> {
    lease_ids: &'a [String],
}

#[derive(Debug, Serialize)]
struct RetryRequest<'a> {
    lease_ids: &'a [String],
    delay_seconds: u64,
}

#[derive(Debug, Deserialize, Default)]
struct BatchAckResponse {
    #[serde(default)]
    failed_lease_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
struct SendRequest {
    body: serde_json::Value,
}

/// Decode a queue message body: base64-then-JSON if `is_base64` is set,
/// else JSON directly. Split out as a free function so it's unit-testable
/// without any network access.
pub fn decode_body(raw: &str, is_base64: bool) -> Result<serde_json::Value, String> {
    let text = if is_base64 {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(raw)
            .map_err(|e| format!("bad base64: {e}"))?;
        String::from_utf8(bytes).map_err(|e| format!("body is not utf-8: {e}"))?
    } else {
        raw.to_string()
    };
    serde_json::from_str(&text).map_err(|e| format!("bad json: {e}"))
}

/// Full-jitter exponential backoff delay for retry attempt `n` (1-based),
/// base 100ms, cap 2s.
pub fn backoff_delay(attempt: u32, rng: &mut impl Rng) -> Duration {
    let base_ms: u64 = 100;
    let cap_ms: u64 = 2_000;
    let exp_ms = base_ms.saturating_mul(1u64 << attempt.saturating_sub(1).min(16));
    let capped = exp_ms.min(cap_ms);
    let jittered = rng.gen_range(0..=capped.max(1));
    Duration::from_millis(jittered)
}

/// HTTP adapter to the external queue service.
pub struct QueueClient {
    http: reqwest::Client,
    base_url: Url,
    account_id: String,
    api_token: String,
}

impl QueueClient {
    pub fn new(http: reqwest::Client, base_url: Url, account_id: String, api_token: String) -> Self {
        Self {
            http,
            base_url,
            account_id,
            api_token,
        }
    }

    fn queue_url(&self, queue: &str, op: &str) -> Result<Url, QueueError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| QueueError::Url(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .extend(["accounts", &self.account_id, "queues", queue, "messages", op]);
        Ok(url)
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.bearer_auth(&self.api_token)
    }

    async fn http_error(res: reqwest::Response) -> QueueError {
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        QueueError::Http { status, body }
    }

    /// Pull up to `batch_size` (1..=100) messages, leasing them for
    /// `visibility_seconds` (1..=43_200).
    pub async fn pull(
        &self,
        queue: &str,
        batch_size: u32,
        visibility_seconds: u64,
    ) -> Result<Vec<PulledMessage>, QueueError> {
        let batch_size = batch_size.clamp(1, 100);
        let visibility_seconds = visibility_seconds.clamp(1, 43_200);

        let url = self.queue_url(queue, "pull")?;
        let res = self
            .authed(self.http.post(url))
            .json(&PullRequest {
                batch_size,
                visibility_timeout_seconds: visibility_seconds,
            })
            .send()
            .await?;

        if !res.status().is_success() {
            return Err(Self::http_error(res).await);
        }

        let parsed: PullResponse = res.json().await?;
        Ok(parsed
            .messages
            .into_iter()
            .map(|m| match decode_body(&m.body, m.is_base64) {
                Ok(body) => PulledMessage {
                    lease_id: m.lease_id,
                    attempts: m.attempts,
                    body: Some(body),
                    decode_error: None,
                },
                Err(err) => PulledMessage {
                    lease_id: m.lease_id,
                    attempts: m.attempts,
                    body: None,
                    decode_error: Some(err),
                },
            })
            .collect())
    }

    /// Acknowledge a batch of lease ids. Partial failures are retried
    /// individually; returns `Ok(())` only once every id has been
    /// acknowledged.
    pub async fn ack(&self, queue: &str, lease_ids: &[String]) -> Result<(), QueueError> {
        if lease_ids.is_empty() {
            return Ok(());
        }
        let url = self.queue_url(queue, "ack")?;
        let res = self
            .authed(self.http.post(url))
            .json(&AckRequest { lease_ids })
            .send()
            .await?;

        if !res.status().is_success() {
            return Err(Self::http_error(res).await);
        }

        let parsed: BatchAckResponse = res.json().await.unwrap_or_default();
        if parsed.failed_lease_ids.is_empty() {
            Ok(())
        } else {
            Box::pin(self.ack(queue, &parsed.failed_lease_ids)).await
        }
    }

    /// Make a batch of leased messages visible again after `delay_seconds`.
    pub async fn retry(
        &self,
        queue: &str,
        lease_ids: &[String],
        delay_seconds: u64,
    ) -> Result<(), QueueError> {
        if lease_ids.is_empty() {
            return Ok(());
        }
        let url = self.queue_url(queue, "retry")?;
        let res = self
            .authed(self.http.post(url))
            .json(&RetryRequest {
                lease_ids,
                delay_seconds,
            })
            .send()
            .await?;

        if !res.status().is_success() {
            return Err(Self::http_error(res).await);
        }

        let parsed: BatchAckResponse = res.json().await.unwrap_or_default();
        if parsed.failed_lease_ids.is_empty() {
            Ok(())
        } else {
            Box::pin(self.retry(queue, &parsed.failed_lease_ids, delay_seconds)).await
        }
    }

    /// Enqueue a message, retrying on 429 with full-jitter exponential
    /// backoff (base 100ms, cap 2s, up to 5 attempts).
    pub async fn send(&self, queue: &str, body: serde_json::Value) -> Result<(), QueueError> {
        let url = self.queue_url(queue, "send")?;
        let mut rng = rand::thread_rng();

        for attempt in 1..=5u32 {
            let res = self
                .authed(self.http.post(url.clone()))
                .json(&SendRequest { body: body.clone() })
                .send()
                .await?;

            if res.status() == StatusCode::TOO_MANY_REQUESTS {
                if attempt == 5 {
                    return Err(QueueError::RateLimited { attempts: attempt });
                }
                let delay = backoff_delay(attempt, &mut rng);
                tracing::warn!(queue, attempt, delay_ms = delay.as_millis() as u64, "queue send rate limited, backing off");
                tokio::time::sleep(delay).await;
                continue;
            }

            if !res.status().is_success() {
                return Err(Self::http_error(res).await);
            }

            return Ok(());
        }

        Err(QueueError::RateLimited { attempts: 5 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_body_plain_json() {
        let v = decode_body(r#"{"a":1}"#, false).unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn decode_body_base64_json() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(r#"{"a":2}"#);
        let v = decode_body(&encoded, true).unwrap();
        assert_eq!(v["a"], 2);
    }

    #[test]
    fn decode_body_rejects_garbage() {
        assert!(decode_body("not json", false).is_err());
    }

    #[test]
    fn backoff_delay_respects_cap_and_floor() {
        let mut rng = rand::thread_rng();
        for attempt in 1..=10 {
            let d = backoff_delay(attempt, &mut rng);
            assert!(d <= Duration::from_millis(2_000));
        }
    }

    #[test]
    fn backoff_delay_grows_with_attempt_ceiling() {
        // The *ceiling* (pre-jitter) must grow monotonically up to the cap.
        let ceilings: Vec<u64> = (1..=6)
            .map(|a: u32| 100u64.saturating_mul(1u64 << (a - 1)).min(2_000))
            .collect();
        assert_eq!(ceilings, vec![100, 200, 400, 800, 1600, 2000]);
    }
}
