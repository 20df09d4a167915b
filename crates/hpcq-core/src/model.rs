//! Wire types shared by every component: the Job Message on the jobs queue,
//! the Result Event on the results queue, and the ephemeral Lease a pull
//! returns alongside a message.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default wall-clock timeout applied when a job doesn't specify one.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 86_400;

/// Size of the in-memory rolling tail kept for stdout/stderr.
pub const TAIL_BYTES: usize = 4096;

/// A short, human-readable, idempotency-key job id: `<word>-<word>-<6-hex>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

/// Error returned when a candidate string is not a valid [`JobId`].
#[derive(Debug, thiserror::Error)]
#[error("invalid job id {0:?}: must match ^[a-z]+-[a-z]+-[0-9a-f]{{6}}$ and be <= 40 chars")]
pub struct InvalidJobId(pub String);

impl JobId {
    /// Build a `JobId`, validating the character set, shape, and length.
    pub fn new(raw: impl Into<String>) -> Result<Self, InvalidJobId> {
        let raw = raw.into();
        if Self::is_valid(&raw) {
            Ok(Self(raw))
        } else {
            Err(InvalidJobId(raw))
        }
    }

    /// Construct without validation. Only for code paths (the short-id
    /// generator) that already guarantee the invariant by construction.
    pub fn new_unchecked(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    fn is_valid(raw: &str) -> bool {
        if raw.len() > 40 {
            return false;
        }
        let mut parts = raw.rsplitn(2, '-');
        let Some(hex) = parts.next() else { return false };
        let Some(rest) = parts.next() else { return false };
        if hex.len() != 6 || !hex.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()) {
            return false;
        }
        let mut words = rest.splitn(2, '-');
        let Some(w1) = words.next() else { return false };
        let Some(w2) = words.next() else { return false };
        !w1.is_empty()
            && !w2.is_empty()
            && w1.bytes().all(|b| b.is_ascii_lowercase())
            && w2.bytes().all(|b| b.is_ascii_lowercase())
    }

    /// Borrow the underlying string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `exec_mode` on a Job Message's `input`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecMode {
    /// Run the command inside the container runtime (default).
    Container,
    /// Run the command directly via the host shell.
    Host,
}

impl Default for ExecMode {
    fn default() -> Self {
        ExecMode::Container
    }
}

/// The Job Message placed on the jobs queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMessage {
    pub job_id: JobId,
    pub input: serde_json::Value,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Typed, defaulting accessors over a Job Message's free-form `input` map.
///
/// Unknown fields are ignored by execution (per spec §9); they simply aren't
/// read by any accessor here.
#[derive(Debug, Clone, Copy)]
pub struct JobInput<'a>(pub &'a serde_json::Value);

impl<'a> JobInput<'a> {
    pub fn command(&self) -> Option<&'a str> {
        self.0.get("command").and_then(|v| v.as_str())
    }

    pub fn exec_mode(&self) -> ExecMode {
        match self.0.get("exec_mode").and_then(|v| v.as_str()) {
            Some("host") => ExecMode::Host,
            _ => ExecMode::Container,
        }
    }

    /// Runner to prepend to a `run-file` job's materialised path. `None`
    /// means "not a run-file job"; `Some("")` means "exec the file
    /// directly".
    pub fn runner(&self) -> Option<&'a str> {
        self.0.get("runner").and_then(|v| v.as_str())
    }

    pub fn file_name(&self) -> Option<&'a str> {
        self.0.get("file_name").and_then(|v| v.as_str())
    }

    pub fn file_content_b64(&self) -> Option<&'a str> {
        self.0.get("file_content_b64").and_then(|v| v.as_str())
    }

    pub fn timeout_seconds(&self) -> u64 {
        self.0
            .get("timeout_seconds")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_TIMEOUT_SECONDS)
    }
}

impl JobMessage {
    pub fn input(&self) -> JobInput<'_> {
        JobInput(&self.input)
    }
}

/// A tagged-union result event published to the results queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResultEvent {
    Heartbeat {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        job_id: Option<JobId>,
        hpc_running_remote: bool,
        hostname: String,
        timestamp: DateTime<Utc>,
        worker_version: String,
    },
    Running {
        job_id: JobId,
        stdout_tail: String,
        stderr_tail: String,
        bytes_read_stdout: u64,
        bytes_read_stderr: u64,
        timestamp: DateTime<Utc>,
    },
    Completed {
        job_id: JobId,
        exit_code: i32,
        duration_seconds: f64,
        stdout_tail: String,
        stderr_tail: String,
        result_pointer: Option<String>,
        timestamp: DateTime<Utc>,
    },
    Failed {
        job_id: JobId,
        exit_code: Option<i32>,
        error_kind: crate::error::ErrorKind,
        error_detail: String,
        duration_seconds: f64,
        stdout_tail: String,
        stderr_tail: String,
        timestamp: DateTime<Utc>,
    },
}

impl ResultEvent {
    /// `job_id` for events that carry one (heartbeats never do).
    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            ResultEvent::Heartbeat { job_id, .. } => job_id.as_ref(),
            ResultEvent::Running { job_id, .. }
            | ResultEvent::Completed { job_id, .. }
            | ResultEvent::Failed { job_id, .. } => Some(job_id),
        }
    }

    /// Whether this event is a terminal (`completed`/`failed`) event.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ResultEvent::Completed { .. } | ResultEvent::Failed { .. })
    }
}

/// An ephemeral association between a pulled queue message and this
/// consumer. `visibility_deadline` is monotonic and is never serialized —
/// it only exists for in-process bookkeeping.
#[derive(Debug, Clone)]
pub struct Lease {
    pub lease_id: String,
    pub visibility_deadline: std::time::Instant,
}

/// Heartbeat/in-flight snapshot persisted by the Results Consumer and read
/// back by the CLI's `status` operation (spec §4.6). `hpc_heartbeat_age_seconds`
/// is deliberately not stored here — it's relative to "now" and is computed
/// by the reader at display time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub hpc_running_remote: bool,
    pub hostname: String,
    pub hpc_last_heartbeat: DateTime<Utc>,
    pub worker_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_flight_job_id: Option<JobId>,
}
