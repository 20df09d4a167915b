//! The Results Consumer (spec §4.6): a local-side loop that pulls from the
//! results queue, classifies each event (heartbeat / running-log /
//! terminal), writes deduplicated log tails plus atomic `<job_id>.json`
//! artefacts, surfaces heartbeat fields into the CLI's status snapshot, and
//! acks everything it receives.
//!
//! Grounded on `hpcq-consumer::main`'s poll/sleep loop shape, simplified:
//! no lease renewal and no execution, just pull/classify/write/ack.

mod artifacts;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use hpcq_core::config::{PathConfig, QueueConfig, QueueEndpointConfig};
use hpcq_core::{JobId, ResultEvent, StatusSnapshot};
use hpcq_queue_client::QueueClient;

fn default_poll_interval() -> u64 {
    5
}

fn default_batch_size() -> u32 {
    100
}

#[derive(Debug, Parser)]
#[command(name = "hpcq-results", version, about = "Local HPC job results consumer")]
struct Cli {
    #[command(flatten)]
    queue: QueueConfig,
    #[command(flatten)]
    queue_endpoint: QueueEndpointConfig,
    #[command(flatten)]
    paths: PathConfig,

    /// How often to poll the results queue when idle.
    #[arg(long, env = "RESULTS_POLL_INTERVAL_SECONDS", default_value_t = default_poll_interval())]
    poll_interval_seconds: u64,

    /// Messages pulled per batch.
    #[arg(long, env = "RESULTS_BATCH_SIZE", default_value_t = default_batch_size())]
    batch_size: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let layout = cli.paths.layout();

    let http = reqwest::Client::builder().timeout(Duration::from_secs(30)).build()?;
    let queue_client = Arc::new(QueueClient::new(
        http,
        cli.queue_endpoint.base_url,
        cli.queue.account_id,
        cli.queue.api_token,
    ));

    let poll_interval = Duration::from_secs(cli.poll_interval_seconds);
    let mut in_flight_job_id: Option<JobId> = None;

    tracing::info!("hpcq-results started");

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("SIGTERM received, stopping results consumer");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("SIGINT received, stopping results consumer");
                break;
            }
            pulled = queue_client.pull(&cli.queue.results_queue_id, cli.batch_size, 600) => {
                match pulled {
                    Ok(messages) if messages.is_empty() => {
                        tokio::time::sleep(poll_interval).await;
                    }
                    Ok(messages) => {
                        let mut lease_ids = Vec::with_capacity(messages.len());
                        for message in &messages {
                            lease_ids.push(message.lease_id.clone());
                            let Some(body) = message.body.clone() else {
                                tracing::warn!(decode_error = ?message.decode_error, "dropping undecodable result event");
                                continue;
                            };
                            match serde_json::from_value::<ResultEvent>(body) {
                                Ok(event) => handle_event(&layout, &mut in_flight_job_id, event),
                                Err(e) => tracing::warn!(error = %e, "result event failed to parse"),
                            }
                        }
                        // At-least-once toward local disk: ack everything received,
                        // regardless of per-event write outcome (spec §4.6).
                        if let Err(e) = queue_client.ack(&cli.queue.results_queue_id, &lease_ids).await {
                            tracing::warn!(error = %e, "failed to ack results batch");
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "results poll failed, sleeping and retrying");
                        tokio::time::sleep(poll_interval).await;
                    }
                }
            }
        }
    }

    Ok(())
}

fn handle_event(layout: &hpcq_core::Layout, in_flight_job_id: &mut Option<JobId>, event: ResultEvent) {
    if let ResultEvent::Running { job_id, .. } = &event {
        *in_flight_job_id = Some(job_id.clone());
    }
    if event.is_terminal() {
        *in_flight_job_id = None;
    }

    if let ResultEvent::Heartbeat {
        hpc_running_remote,
        hostname,
        timestamp,
        worker_version,
        ..
    } = &event
    {
        let snapshot = StatusSnapshot {
            hpc_running_remote: *hpc_running_remote,
            hostname: hostname.clone(),
            hpc_last_heartbeat: *timestamp,
            worker_version: worker_version.clone(),
            in_flight_job_id: in_flight_job_id.clone(),
        };
        if let Err(e) = artifacts::write_status(layout, &snapshot) {
            tracing::warn!(error = %e, "failed to persist status snapshot");
        }
    }

    if let Err(e) = artifacts::apply_event(layout, &event) {
        tracing::warn!(job_id = ?event.job_id(), error = %e, "failed to write local artefact");
    }
}
