//! The restart-on-crash child process manager (spec §4.7).
//!
//! Grounded on `client/src/shutdown.rs`'s `ShutdownController` (two-strikes
//! signal handling: first Ctrl-C asks nicely, a second one forces it)
//! generalized from "stop the in-process engine" to "forward SIGTERM to a
//! child process", and on `hpcq-executor::executor`'s graceful-then-hard-kill
//! shape (`kill -TERM`, then `start_kill` after a grace period) reused
//! verbatim for the same reason: keep the crate free of raw `libc` calls.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tokio::process::{Child, Command};

use crate::backoff::{restart_delay, MIN_UPTIME_FOR_RESET};

pub struct SupervisorConfig {
    pub child_bin: PathBuf,
    pub child_args: Vec<String>,
    pub pid_file: PathBuf,
    /// How long to wait after a graceful SIGTERM before hard-killing the
    /// child (spec §4.7: 10s).
    pub hard_kill_grace: Duration,
}

/// Run the supervised restart loop until SIGTERM/SIGINT. Writes this
/// process's own PID to `config.pid_file` before entering the loop.
pub async fn run(config: SupervisorConfig) -> anyhow::Result<()> {
    hpcq_core::layout::write_atomic(&config.pid_file, std::process::id().to_string())?;

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let mut attempt: u32 = 0;

    loop {
        let mut child = spawn_child(&config)?;
        let started_at = Instant::now();
        tracing::info!(pid = ?child.id(), "supervised child started");

        tokio::select! {
            status = child.wait() => {
                let uptime = started_at.elapsed();
                if uptime >= MIN_UPTIME_FOR_RESET {
                    attempt = 0;
                }
                match status {
                    Ok(status) if status.success() => {
                        tracing::info!("supervised child exited cleanly, stopping supervisor");
                        return Ok(());
                    }
                    Ok(status) => {
                        attempt += 1;
                        let delay = restart_delay(attempt);
                        tracing::warn!(?status, attempt, delay_secs = delay.as_secs(), "child exited non-zero, restarting after backoff");
                        tokio::time::sleep(delay).await;
                    }
                    Err(e) => {
                        attempt += 1;
                        let delay = restart_delay(attempt);
                        tracing::warn!(error = %e, attempt, delay_secs = delay.as_secs(), "failed to wait on child, restarting after backoff");
                        tokio::time::sleep(delay).await;
                    }
                }
            }
            _ = sigterm.recv() => {
                tracing::info!("SIGTERM received, forwarding to child");
                terminate_and_wait(&mut child, config.hard_kill_grace).await;
                return Ok(());
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("SIGINT received, forwarding to child");
                terminate_and_wait(&mut child, config.hard_kill_grace).await;
                return Ok(());
            }
        }
    }
}

fn spawn_child(config: &SupervisorConfig) -> anyhow::Result<Child> {
    Ok(Command::new(&config.child_bin).args(&config.child_args).spawn()?)
}

async fn terminate_and_wait(child: &mut Child, grace: Duration) {
    if let Some(pid) = child.id() {
        let _ = Command::new("kill").arg("-TERM").arg(pid.to_string()).status().await;
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(_) => {}
        Err(_) => {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_writes_pid_file_before_spawning() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("supervisor.pid");
        let config = SupervisorConfig {
            child_bin: PathBuf::from("true"),
            child_args: vec![],
            pid_file: pid_file.clone(),
            hard_kill_grace: Duration::from_secs(1),
        };
        // "true" exits 0 immediately: run() returns Ok(()) right away.
        run(config).await.unwrap();
        let written = std::fs::read_to_string(&pid_file).unwrap();
        assert_eq!(written.trim(), std::process::id().to_string());
    }
}
