//! Environment-driven configuration (spec §6.3's table), loaded once at
//! startup into an immutable value shared by every component of a process —
//! no process-wide mutable singletons. Each binary composes the subset of
//! these `clap::Args` structs it needs via `#[command(flatten)]`, the way
//! the teacher's `Cli` flattens `EngineConfig`-shaped fields directly onto
//! its derive struct.

use std::time::Duration;

use clap::Args;
use reqwest::Url;

fn default_poll_interval() -> u64 {
    5
}

fn default_heartbeat_seconds() -> u64 {
    30
}

fn default_image_refresh_hours() -> u64 {
    24
}

/// Routing + credentials for the external queue service (`CF_*` in §6.3).
#[derive(Debug, Clone, Args)]
pub struct QueueConfig {
    /// Bearer token for the queue service's pull/ack/send API.
    #[arg(long, env = "CF_QUEUES_API_TOKEN")]
    pub api_token: String,

    /// Queue-service account id.
    #[arg(long, env = "CF_ACCOUNT_ID")]
    pub account_id: String,

    /// Jobs queue id.
    #[arg(long, env = "CF_JOBS_QUEUE_ID")]
    pub jobs_queue_id: String,

    /// Results queue id.
    #[arg(long, env = "CF_RESULTS_QUEUE_ID")]
    pub results_queue_id: String,
}

/// Container runtime + image configuration (`APPTAINER_*` in §6.3).
#[derive(Debug, Clone, Args)]
pub struct ImageConfig {
    /// Path to the container runtime binary (e.g. `apptainer`).
    #[arg(long, env = "APPTAINER_BIN", default_value = "apptainer")]
    pub apptainer_bin: String,

    /// Local path of the installed container image.
    #[arg(long, env = "APPTAINER_IMAGE")]
    pub apptainer_image: String,

    /// OCI reference (`registry/repo:tag` or `…@sha256:…`) to refresh from.
    #[arg(long, env = "APPTAINER_OCI_REF")]
    pub apptainer_oci_ref: String,

    /// Fallback URL to fetch a prebuilt SIF from, used as a last resort
    /// when no local image exists and digest resolution fails.
    #[arg(long, env = "APPTAINER_SIF_URL")]
    pub apptainer_sif_url: Option<String>,

    /// Maximum interval between unconditional refresh attempts.
    #[arg(long, env = "IMAGE_REFRESH_HOURS", default_value_t = default_image_refresh_hours())]
    pub image_refresh_hours: u64,
}

/// Pull Consumer Loop timing (`POLL_INTERVAL_SECONDS`/`HEARTBEAT_SECONDS`).
#[derive(Debug, Clone, Args)]
pub struct LoopConfig {
    /// How often to poll the jobs queue when idle.
    #[arg(long, env = "POLL_INTERVAL_SECONDS", default_value_t = default_poll_interval())]
    pub poll_interval_seconds: u64,

    /// Heartbeat cadence, regardless of job activity.
    #[arg(long, env = "HEARTBEAT_SECONDS", default_value_t = default_heartbeat_seconds())]
    pub heartbeat_seconds: u64,
}

impl LoopConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_seconds)
    }
}

/// Per-job workspace root (`RESULTS_DIR`).
#[derive(Debug, Clone, Args)]
pub struct PathConfig {
    /// Root directory the persisted tree (spec §6.5) is rooted at.
    #[arg(long, env = "RESULTS_DIR", default_value = ".")]
    pub repo_root: std::path::PathBuf,
}

impl PathConfig {
    pub fn layout(&self) -> crate::layout::Layout {
        crate::layout::Layout::under(self.repo_root.clone())
    }
}

/// Producer Endpoint auth (`API_KEY`).
#[derive(Debug, Clone, Args)]
pub struct ApiAuthConfig {
    /// Shared secret required on the `x-api-key` header.
    #[arg(long, env = "API_KEY")]
    pub api_key: String,
}

/// Queue-service base URL; not in the spec's env table (the table treats
/// queue endpoints as vendor-internal), but every client needs a base URL
/// to reach the service from, so it's exposed as a plain flag/env pair
/// alongside the other flattened config blocks.
#[derive(Debug, Clone, Args)]
pub struct QueueEndpointConfig {
    #[arg(long, env = "CF_QUEUES_BASE_URL")]
    pub base_url: Url,
}
