//! The Pull Consumer Loop (spec §4.5): the HPC-node main loop that polls the
//! jobs queue, dispatches each message to the Job Executor, runs a heartbeat
//! ticker concurrently, and acknowledges exactly once on terminal state.
//!
//! Grounded on the teacher's `client-engine::engine::EngineRuntime::run`
//! (the same `tokio::select!` shape: a tick branch, a fetch-task branch, a
//! worker-completion branch) collapsed to concurrency=1 and a heartbeat
//! ticker added in place of the progress ticker.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::Parser;
use hpcq_core::config::{ImageConfig, LoopConfig, PathConfig, QueueConfig, QueueEndpointConfig};
use hpcq_core::{ErrorKind, JobMessage, ResultEvent};
use hpcq_executor::{Executor, ExecutorConfig, QueueResultSink};
use hpcq_image::ImageRefresher;
use hpcq_queue_client::QueueClient;

#[derive(Debug, Parser)]
#[command(name = "hpc-consumer", version, about = "HPC-side job queue consumer")]
struct Cli {
    #[command(flatten)]
    queue: QueueConfig,
    #[command(flatten)]
    queue_endpoint: QueueEndpointConfig,
    #[command(flatten)]
    image: ImageConfig,
    #[command(flatten)]
    loop_cfg: LoopConfig,
    #[command(flatten)]
    paths: PathConfig,

    /// Extra bind mounts passed to the container runtime, `host:container`.
    #[arg(long = "bind", value_name = "HOST:CONTAINER")]
    extra_mounts: Vec<String>,
}

fn hostname() -> String {
    let mut buf = vec![0u8; 256];
    let ok = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) == 0 };
    if !ok {
        return "unknown-host".to_string();
    }
    let nul = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..nul]).into_owned()
}

fn parse_bind_mount(spec: &str) -> anyhow::Result<(String, String)> {
    let (host, container) = spec
        .split_once(':')
        .ok_or_else(|| anyhow::anyhow!("invalid --bind {spec:?}, expected HOST:CONTAINER"))?;
    Ok((host.to_string(), container.to_string()))
}

async fn send_heartbeat(queue_client: &QueueClient, queue_id: &str, hostname: &str, running: &AtomicBool) {
    let event = ResultEvent::Heartbeat {
        job_id: None,
        hpc_running_remote: running.load(Ordering::Relaxed),
        hostname: hostname.to_string(),
        timestamp: chrono::Utc::now(),
        worker_version: env!("CARGO_PKG_VERSION").to_string(),
    };
    if let Ok(body) = serde_json::to_value(&event) {
        if let Err(e) = queue_client.send(queue_id, body).await {
            tracing::warn!(error = %e, "failed to emit heartbeat");
        }
    }
}

/// `visibility_seconds = max(600, min(43200, timeout_seconds + 60))` (spec §4.5).
fn visibility_seconds_for(timeout_seconds: u64) -> u64 {
    (timeout_seconds.saturating_add(60)).clamp(600, 43_200)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let hostname = hostname();

    let extra_mounts = cli
        .extra_mounts
        .iter()
        .map(|s| parse_bind_mount(s))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let http = reqwest::Client::builder().timeout(Duration::from_secs(60)).build()?;

    let queue_client = Arc::new(QueueClient::new(
        http.clone(),
        cli.queue_endpoint.base_url,
        cli.queue.account_id,
        cli.queue.api_token,
    ));

    let layout = cli.paths.layout();
    let image_path = layout.image_path(&cli.image.apptainer_image);

    let refresher = ImageRefresher::new(
        http.clone(),
        cli.image.apptainer_bin.clone(),
        image_path.clone(),
        cli.image.apptainer_oci_ref.clone(),
        cli.image.apptainer_sif_url.clone(),
        hpcq_image::registry::RegistryAuth::default(),
    );

    // Blocking startup refresh (spec §4.3): a worker with no usable image
    // has nothing useful to do.
    match refresher.refresh().await {
        Ok(outcome) => tracing::info!(?outcome, "startup image refresh complete"),
        Err(e) if image_path.exists() => {
            tracing::warn!(error = %e, "startup image refresh failed, continuing with existing image");
        }
        Err(e) => {
            tracing::error!(error = %e, "startup image refresh failed and no local image exists");
            std::process::exit(4);
        }
    }

    let mut executor_config = ExecutorConfig::new(cli.image.apptainer_bin.clone(), image_path);
    executor_config.extra_mounts = extra_mounts;
    let executor = Executor::new(executor_config, layout.clone());
    let sink = QueueResultSink::new(queue_client.clone(), cli.queue.results_queue_id.clone());

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let running = Arc::new(AtomicBool::new(false));

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    let heartbeat_queue = queue_client.clone();
    let heartbeat_results_queue_id = cli.queue.results_queue_id.clone();
    let heartbeat_hostname = hostname.clone();
    let heartbeat_running = running.clone();
    let heartbeat_interval = cli.loop_cfg.heartbeat_interval();
    let mut heartbeat_shutdown = shutdown_rx.clone();
    let heartbeat_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(heartbeat_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    send_heartbeat(&heartbeat_queue, &heartbeat_results_queue_id, &heartbeat_hostname, &heartbeat_running).await;
                }
                _ = heartbeat_shutdown.changed() => {
                    if *heartbeat_shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    });

    tracing::info!(hostname, "hpc-consumer started");

    let mut stopping = false;
    loop {
        if stopping {
            break;
        }

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("SIGTERM received, stopping poll loop");
                stopping = true;
                let _ = shutdown_tx.send(true);
                continue;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("SIGINT received, stopping poll loop");
                stopping = true;
                let _ = shutdown_tx.send(true);
                continue;
            }
            // timeout_seconds lives inside the message body, so it isn't
            // known until after the pull; lease for the formula's ceiling
            // up front rather than the per-job value.
            pulled = queue_client.pull(
                &cli.queue.jobs_queue_id,
                1,
                visibility_seconds_for(hpcq_core::model::DEFAULT_TIMEOUT_SECONDS),
            ) => {
                match pulled {
                    Ok(messages) if messages.is_empty() => {
                        tokio::time::sleep(cli.loop_cfg.poll_interval()).await;
                    }
                    Ok(messages) => {
                        for message in messages {
                            dispatch(
                                &queue_client,
                                &cli.queue.jobs_queue_id,
                                &executor,
                                &sink,
                                &refresher,
                                &running,
                                shutdown_rx.clone(),
                                message,
                            )
                            .await;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "poll failed, sleeping and retrying");
                        tokio::time::sleep(cli.loop_cfg.poll_interval()).await;
                    }
                }
            }
        }
    }

    let _ = heartbeat_task.await;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn dispatch(
    queue_client: &QueueClient,
    jobs_queue_id: &str,
    executor: &Executor,
    sink: &QueueResultSink,
    refresher: &ImageRefresher,
    running: &AtomicBool,
    shutdown: tokio::sync::watch::Receiver<bool>,
    message: hpcq_queue_client::PulledMessage,
) {
    let Some(body) = message.body else {
        tracing::warn!(decode_error = ?message.decode_error, "dropping undecodable (poison) message");
        if let Err(e) = queue_client.ack(jobs_queue_id, std::slice::from_ref(&message.lease_id)).await {
            tracing::warn!(error = %e, "failed to ack poison message");
        }
        return;
    };

    let job: JobMessage = match serde_json::from_value(body) {
        Ok(job) => job,
        Err(e) => {
            tracing::warn!(error = %e, "job message failed to parse, acking and dropping");
            if let Err(e) = queue_client.ack(jobs_queue_id, std::slice::from_ref(&message.lease_id)).await {
                tracing::warn!(error = %e, "failed to ack invalid job message");
            }
            return;
        }
    };

    // Pre-execution digest probe is best-effort: a failure here must not
    // fail the job if a usable image already exists (spec §4.3).
    if let Err(e) = refresher.refresh().await {
        tracing::warn!(job_id = %job.job_id, error = %e, "pre-job image refresh failed, continuing with existing image");
    }

    running.store(true, Ordering::Relaxed);
    let outcome = executor.run_cancelable(&job, sink, shutdown).await;
    running.store(false, Ordering::Relaxed);

    let worker_shutdown = matches!(
        &outcome.event,
        ResultEvent::Failed { error_kind: ErrorKind::WorkerShutdown, .. }
    );

    if worker_shutdown {
        tracing::info!(job_id = %job.job_id, "job terminated by shutdown, leaving message for redelivery");
        return;
    }

    if !outcome.emitted {
        tracing::warn!(job_id = %job.job_id, "terminal event could not be enqueued, leaving message for redelivery");
        return;
    }

    if let Err(e) = queue_client.ack(jobs_queue_id, std::slice::from_ref(&message.lease_id)).await {
        tracing::warn!(job_id = %job.job_id, error = %e, "failed to ack job message after successful terminal event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use axum::extract::State;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    #[test]
    fn visibility_floor_and_ceiling_match_spec() {
        assert_eq!(visibility_seconds_for(0), 600);
        assert_eq!(visibility_seconds_for(86_400), 43_200);
        assert_eq!(visibility_seconds_for(600), 660);
    }

    #[test]
    fn parse_bind_mount_splits_on_first_colon() {
        let (host, container) = parse_bind_mount("/data:/mnt/data").unwrap();
        assert_eq!(host, "/data");
        assert_eq!(container, "/mnt/data");
    }

    #[test]
    fn parse_bind_mount_rejects_missing_colon() {
        assert!(parse_bind_mount("/data").is_err());
    }

    /// Mock of the two queue endpoints `dispatch` touches: the jobs queue's
    /// `ack` and the results queue's `send`. Lets the ack-discipline tests
    /// (spec §4.5/§7) assert the full pull→execute→emit→ack chain without a
    /// real queue service.
    #[derive(Default)]
    struct MockQueue {
        acked: Mutex<Vec<Value>>,
        reject_send: std::sync::atomic::AtomicBool,
    }

    async fn ack_handler(State(state): State<Arc<MockQueue>>, Json(body): Json<Value>) -> Json<Value> {
        state.acked.lock().unwrap().push(body);
        Json(json!({"failed_lease_ids": []}))
    }

    async fn send_handler(
        State(state): State<Arc<MockQueue>>,
        Json(_body): Json<Value>,
    ) -> (axum::http::StatusCode, Json<Value>) {
        if state.reject_send.load(Ordering::SeqCst) {
            (axum::http::StatusCode::INTERNAL_SERVER_ERROR, Json(json!({})))
        } else {
            (axum::http::StatusCode::OK, Json(json!({})))
        }
    }

    async fn spawn_mock_queue(state: Arc<MockQueue>) -> url::Url {
        let app = Router::new()
            .route("/accounts/:account_id/queues/:queue/messages/ack", post(ack_handler))
            .route("/accounts/:account_id/queues/:queue/messages/send", post(send_handler))
            .with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        url::Url::parse(&format!("http://{addr}")).unwrap()
    }

    fn dispatch_fixtures(
        dir: &std::path::Path,
        base_url: &url::Url,
    ) -> (QueueClient, Executor, QueueResultSink, ImageRefresher) {
        let layout = hpcq_core::Layout::under(dir.to_path_buf());
        let queue_client = QueueClient::new(reqwest::Client::new(), base_url.clone(), "acct".into(), "token".into());
        let executor = Executor::new(ExecutorConfig::new("apptainer", dir.join("image.sif")), layout);
        let sink = QueueResultSink::new(
            Arc::new(QueueClient::new(reqwest::Client::new(), base_url.clone(), "acct".into(), "token".into())),
            "hpc-results",
        );
        // An invalid reference fails `OciRef::parse` synchronously, before
        // any network call, so the pre-job refresh's best-effort failure
        // path is exercised without needing a real registry.
        let refresher = ImageRefresher::new(
            reqwest::Client::new(),
            "apptainer",
            dir.join("image.sif"),
            "",
            None,
            hpcq_image::registry::RegistryAuth::default(),
        );
        (queue_client, executor, sink, refresher)
    }

    fn job_message(job_id: &str, command: &str) -> hpcq_queue_client::PulledMessage {
        hpcq_queue_client::PulledMessage {
            lease_id: format!("lease-{job_id}"),
            attempts: 1,
            body: Some(json!({
                "job_id": job_id,
                "input": {"exec_mode": "host", "command": command},
                "created_at": chrono::Utc::now(),
                "metadata": null,
            })),
            decode_error: None,
        }
    }

    #[tokio::test]
    async fn dispatch_acks_after_successful_terminal_event() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockQueue::default());
        let base_url = spawn_mock_queue(mock.clone()).await;
        let (queue_client, executor, sink, refresher) = dispatch_fixtures(dir.path(), &base_url);
        let running = AtomicBool::new(false);
        let (_tx, rx) = tokio::sync::watch::channel(false);

        dispatch(
            &queue_client,
            "hpc-jobs",
            &executor,
            &sink,
            &refresher,
            &running,
            rx,
            job_message("nebula-otter-1a2b3c", "echo ok"),
        )
        .await;

        assert_eq!(mock.acked.lock().unwrap().len(), 1, "successful terminal event must be acked");
    }

    #[tokio::test]
    async fn dispatch_does_not_ack_when_terminal_event_cannot_be_enqueued() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockQueue::default());
        mock.reject_send.store(true, Ordering::SeqCst);
        let base_url = spawn_mock_queue(mock.clone()).await;
        let (queue_client, executor, sink, refresher) = dispatch_fixtures(dir.path(), &base_url);
        let running = AtomicBool::new(false);
        let (_tx, rx) = tokio::sync::watch::channel(false);

        dispatch(
            &queue_client,
            "hpc-jobs",
            &executor,
            &sink,
            &refresher,
            &running,
            rx,
            job_message("nebula-otter-4d5e6f", "echo ok"),
        )
        .await;

        assert!(
            mock.acked.lock().unwrap().is_empty(),
            "a job whose terminal event couldn't be enqueued must be left for redelivery, not acked"
        );
    }

    #[tokio::test]
    async fn dispatch_leaves_poison_message_acked_and_unexecuted() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockQueue::default());
        let base_url = spawn_mock_queue(mock.clone()).await;
        let (queue_client, executor, sink, refresher) = dispatch_fixtures(dir.path(), &base_url);
        let running = AtomicBool::new(false);
        let (_tx, rx) = tokio::sync::watch::channel(false);

        let poison = hpcq_queue_client::PulledMessage {
            lease_id: "lease-poison".to_string(),
            attempts: 1,
            body: None,
            decode_error: Some("bad base64".to_string()),
        };
        dispatch(&queue_client, "hpc-jobs", &executor, &sink, &refresher, &running, rx, poison).await;

        assert_eq!(mock.acked.lock().unwrap().len(), 1, "poison messages must still be acked to drain");
    }
}
