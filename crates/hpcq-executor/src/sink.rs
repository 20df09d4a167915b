//! Where the Executor publishes result events. A trait rather than a
//! concrete `QueueClient` so tests can substitute an in-memory fake
//! (grounded on the `async_trait`-boxed adapter traits in
//! `other_examples/25700dfa_containers-containrs__src-oci-oci_runtime.rs`).

use std::sync::Arc;

use async_trait::async_trait;
use hpcq_core::ResultEvent;

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct SinkError(pub String);

#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn emit(&self, event: &ResultEvent) -> Result<(), SinkError>;
}

/// Publishes result events onto the results queue via [`hpcq_queue_client::QueueClient`].
pub struct QueueResultSink {
    client: Arc<hpcq_queue_client::QueueClient>,
    results_queue_id: String,
}

impl QueueResultSink {
    pub fn new(client: Arc<hpcq_queue_client::QueueClient>, results_queue_id: impl Into<String>) -> Self {
        Self {
            client,
            results_queue_id: results_queue_id.into(),
        }
    }
}

#[async_trait]
impl ResultSink for QueueResultSink {
    async fn emit(&self, event: &ResultEvent) -> Result<(), SinkError> {
        let body = serde_json::to_value(event).map_err(|e| SinkError(e.to_string()))?;
        self.client
            .send(&self.results_queue_id, body)
            .await
            .map_err(|e| SinkError(e.to_string()))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct RecordingSink {
        pub events: Mutex<Vec<ResultEvent>>,
        pub fail_next: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl ResultSink for RecordingSink {
        async fn emit(&self, event: &ResultEvent) -> Result<(), SinkError> {
            use std::sync::atomic::Ordering;
            if self.fail_next.load(Ordering::SeqCst) > 0 {
                self.fail_next.fetch_sub(1, Ordering::SeqCst);
                return Err(SinkError("injected failure".to_string()));
            }
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }
    }
}
