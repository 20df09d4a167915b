//! The error taxonomy from spec §7, as a real type rather than a set of
//! string literals. Every module that can fail maps its local error type
//! into one `ErrorKind` at the point it becomes externally visible — the
//! terminal result event is the single point of external communication.

use serde::{Deserialize, Serialize};

/// A coarse failure classification attached to `ResultEvent::Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Job message malformed or missing required fields.
    InvalidInput,
    /// Body undecodable and `job_id` unknown; drained without retry.
    Poison,
    /// No usable container image and refresh failed.
    ImageUnavailable,
    /// Container/host process could not be spawned.
    LaunchFailed,
    /// Wall-clock timeout exceeded.
    Timeout,
    /// Process exited with a non-zero status.
    NonzeroExit,
    /// Queue service HTTP call failed.
    TransportError,
    /// Queue service returned 429 and backoff was exhausted.
    RateLimited,
    /// SIGTERM arrived while a job was in flight.
    WorkerShutdown,
}

impl ErrorKind {
    /// The wire name used in `error_kind`.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Poison => "poison",
            ErrorKind::ImageUnavailable => "image_unavailable",
            ErrorKind::LaunchFailed => "launch_failed",
            ErrorKind::Timeout => "timeout",
            ErrorKind::NonzeroExit => "nonzero_exit",
            ErrorKind::TransportError => "transport_error",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::WorkerShutdown => "worker_shutdown",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
