//! `q`: the HPC-side control surface (spec §6.3) — `start`/`stop`/`status`/
//! `clear`, layered over the Supervisor, Queue Client, and Image Refresher.
//!
//! Exit codes: 0 success; 2 config/credential missing (handled for us by
//! `clap`'s default parse-error exit code); 3 transport failure; 4 image
//! refresh failure.

mod cli;
mod drain;
mod process;

use std::process::{ExitCode, Stdio};
use std::time::Duration;

use clap::Parser;
use cli::{ClearTarget, Cli, Command};
use hpcq_queue_client::QueueClient;

const EXIT_TRANSPORT_FAILURE: u8 = 3;
const EXIT_IMAGE_FAILURE: u8 = 4;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let layout = cli.paths.layout();

    match &cli.command {
        Command::Start {
            consumer_bin,
            supervisor_bin,
        } => start(&cli, &layout, consumer_bin, supervisor_bin).await,
        Command::Stop {
            all,
            batch_size,
            max_batches,
        } => stop(&cli, &layout, *all, *batch_size, *max_batches).await,
        Command::Status { json } => status(&layout, *json),
        Command::Clear {
            target,
            batch_size,
            max_batches,
        } => clear(&cli, *target, *batch_size, *max_batches).await,
    }
}

fn build_http() -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(Duration::from_secs(30)).build()?)
}

fn build_queue_client(cli: &Cli) -> anyhow::Result<QueueClient> {
    Ok(QueueClient::new(
        build_http()?,
        cli.queue_endpoint.base_url.clone(),
        cli.queue.account_id.clone(),
        cli.queue.api_token.clone(),
    ))
}

async fn start(cli: &Cli, layout: &hpcq_core::Layout, consumer_bin: &str, supervisor_bin: &str) -> ExitCode {
    let image_path = layout.image_path(&cli.image.apptainer_image);
    let refresher = hpcq_image::ImageRefresher::new(
        match build_http() {
            Ok(c) => c,
            Err(e) => {
                eprintln!("error: {e}");
                return ExitCode::from(EXIT_TRANSPORT_FAILURE);
            }
        },
        cli.image.apptainer_bin.clone(),
        image_path.clone(),
        cli.image.apptainer_oci_ref.clone(),
        cli.image.apptainer_sif_url.clone(),
        hpcq_image::registry::RegistryAuth::default(),
    );

    match refresher.refresh().await {
        Ok(outcome) => println!("image refresh: {outcome:?}"),
        Err(e) if image_path.exists() => {
            eprintln!("warning: image refresh failed, continuing with existing image: {e}");
        }
        Err(e) => {
            eprintln!("error: image refresh failed and no local image exists: {e}");
            return ExitCode::from(EXIT_IMAGE_FAILURE);
        }
    }

    if let Some(pid) = process::running_pid(&layout.supervisor_pid_file()) {
        println!("already running (pid {pid})");
        return ExitCode::SUCCESS;
    }

    let spawned = tokio::process::Command::new(supervisor_bin)
        .arg("--child-bin")
        .arg(consumer_bin)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();

    match spawned {
        Ok(child) => {
            println!("launched supervisor (pid {:?})", child.id());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: failed to launch supervisor: {e}");
            ExitCode::from(EXIT_TRANSPORT_FAILURE)
        }
    }
}

async fn stop(cli: &Cli, layout: &hpcq_core::Layout, all: bool, batch_size: u32, max_batches: u32) -> ExitCode {
    match process::running_pid(&layout.supervisor_pid_file()) {
        Some(pid) => {
            if let Err(e) = process::terminate(pid).await {
                eprintln!("error: failed to signal supervisor: {e}");
                return ExitCode::from(EXIT_TRANSPORT_FAILURE);
            }
            println!("sent SIGTERM to supervisor (pid {pid})");
        }
        None => println!("not running"),
    }

    if all {
        let queue_client = match build_queue_client(cli) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("error: {e}");
                return ExitCode::from(EXIT_TRANSPORT_FAILURE);
            }
        };
        for queue in [&cli.queue.jobs_queue_id, &cli.queue.results_queue_id] {
            match drain::drain_queue(&queue_client, queue, batch_size, max_batches).await {
                Ok(n) => println!("drained {n} messages from {queue}"),
                Err(e) => {
                    eprintln!("error: failed to drain {queue}: {e}");
                    return ExitCode::from(EXIT_TRANSPORT_FAILURE);
                }
            }
        }
    }

    ExitCode::SUCCESS
}

fn status(layout: &hpcq_core::Layout, json: bool) -> ExitCode {
    let pid = process::running_pid(&layout.supervisor_pid_file());
    let snapshot: Option<hpcq_core::StatusSnapshot> = std::fs::read(layout.local_status_json())
        .ok()
        .and_then(|b| serde_json::from_slice(&b).ok());

    if json {
        let age_seconds = snapshot
            .as_ref()
            .map(|s| (chrono::Utc::now() - s.hpc_last_heartbeat).num_seconds());
        let body = serde_json::json!({
            "pid": pid,
            "running": pid.is_some(),
            "hpc_running_remote": snapshot.as_ref().map(|s| s.hpc_running_remote),
            "hpc_last_heartbeat": snapshot.as_ref().map(|s| s.hpc_last_heartbeat),
            "hpc_heartbeat_age_seconds": age_seconds,
            "in_flight_job_id": snapshot.as_ref().and_then(|s| s.in_flight_job_id.as_ref()),
        });
        println!("{body}");
    } else {
        match pid {
            Some(pid) => println!("supervisor: running (pid {pid})"),
            None => println!("supervisor: not running"),
        }
        match snapshot {
            Some(s) => {
                let age = (chrono::Utc::now() - s.hpc_last_heartbeat).num_seconds();
                println!("last heartbeat: {} ({age}s ago)", s.hpc_last_heartbeat);
                println!("hpc running remote: {}", s.hpc_running_remote);
                if let Some(job_id) = s.in_flight_job_id {
                    println!("in-flight job: {job_id}");
                }
            }
            None => println!("no heartbeat recorded yet"),
        }
    }

    ExitCode::SUCCESS
}

async fn clear(cli: &Cli, target: ClearTarget, batch_size: u32, max_batches: u32) -> ExitCode {
    let queue_client = match build_queue_client(cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(EXIT_TRANSPORT_FAILURE);
        }
    };

    let queues: Vec<&str> = match target {
        ClearTarget::Jobs => vec![cli.queue.jobs_queue_id.as_str()],
        ClearTarget::Results => vec![cli.queue.results_queue_id.as_str()],
        ClearTarget::All => vec![cli.queue.jobs_queue_id.as_str(), cli.queue.results_queue_id.as_str()],
    };

    for queue in queues {
        match drain::drain_queue(&queue_client, queue, batch_size, max_batches).await {
            Ok(n) => println!("drained {n} messages from {queue}"),
            Err(e) => {
                eprintln!("error: failed to drain {queue}: {e}");
                return ExitCode::from(EXIT_TRANSPORT_FAILURE);
            }
        }
    }

    ExitCode::SUCCESS
}
