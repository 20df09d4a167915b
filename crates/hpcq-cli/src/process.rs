//! PID-file liveness checks and signal delivery, used by `q stop`/`q status`.
//! Shells out to `kill` the same way `hpcq-executor`/`hpcq-supervisor` do,
//! so this crate also stays free of raw `libc` calls.

use std::path::Path;

/// Read a PID file and report the PID only if that process still exists.
/// Liveness is checked via `/proc/<pid>`, which is all a CLI needs here —
/// no signal is actually sent.
pub fn running_pid(pid_file: &Path) -> Option<u32> {
    let raw = std::fs::read_to_string(pid_file).ok()?;
    let pid: u32 = raw.trim().parse().ok()?;
    if Path::new(&format!("/proc/{pid}")).exists() {
        Some(pid)
    } else {
        None
    }
}

pub async fn terminate(pid: u32) -> std::io::Result<()> {
    tokio::process::Command::new("kill")
        .arg("-TERM")
        .arg(pid.to_string())
        .status()
        .await?;
    Ok(())
}
