//! The Job Executor (spec §4.4): workspace setup, command assembly,
//! process launch with tee'd stdout/stderr, periodic `running` events,
//! timeout enforcement, and exactly one terminal event per attempt.
//!
//! Grounded on the teacher's `client-engine::worker::run_job` (one function
//! per job attempt, `Instant`-based timing, every failure boundary mapped
//! to a typed outcome before returning) generalized from a VDF computation
//! to a real child process, with the process-supervision shape borrowed
//! from `other_examples/25700dfa_containers-containrs__src-oci-oci_runtime.rs`
//! (spawn via `tokio::process::Command`, classify by exit status), and the
//! full-jitter backoff in `hpcq_queue_client::backoff_delay` reused for
//! terminal-event send retries (spec §7's `transport_error` handling).

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use base64::Engine as _;
use chrono::Utc;
use hpcq_core::{ErrorKind, JobId, JobMessage, Layout, ResultEvent};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Child;

use crate::command::{build_argv, effective_shell_command};
use crate::sink::ResultSink;
use crate::tail::StreamState;

/// Tunables for the executor; defaults match spec §4.4/§6.3.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub apptainer_bin: String,
    pub apptainer_image: PathBuf,
    pub extra_mounts: Vec<(String, String)>,
    pub tail_interval: Duration,
    pub kill_grace: Duration,
}

impl ExecutorConfig {
    pub fn new(apptainer_bin: impl Into<String>, apptainer_image: impl Into<PathBuf>) -> Self {
        Self {
            apptainer_bin: apptainer_bin.into(),
            apptainer_image: apptainer_image.into(),
            extra_mounts: Vec::new(),
            tail_interval: Duration::from_secs(10),
            kill_grace: Duration::from_secs(5),
        }
    }
}

/// The result of running (or idempotently replaying) one job attempt.
pub struct Outcome {
    pub event: ResultEvent,
    /// Whether the terminal event was successfully handed to the sink.
    /// The Consumer Loop's ack decision hinges on this (spec §4.5).
    pub emitted: bool,
}

/// How [`Executor::supervise`] stopped waiting on the child.
enum SuperviseOutcome {
    Completed,
    TimedOut,
    /// A `true` arrived on the shutdown watch channel (SIGTERM mid-job).
    ShuttingDown,
}

pub struct Executor {
    config: ExecutorConfig,
    layout: Layout,
}

impl Executor {
    pub fn new(config: ExecutorConfig, layout: Layout) -> Self {
        Self { config, layout }
    }

    /// Run one job attempt, or idempotently replay its cached terminal
    /// event if `done.json` already exists (spec §4.4's idempotence rule).
    pub async fn run(&self, job: &JobMessage, sink: &dyn ResultSink) -> Outcome {
        let (_tx, rx) = tokio::sync::watch::channel(false);
        self.run_cancelable(job, sink, rx).await
    }

    /// Same as [`Executor::run`], but `shutdown` going `true` while a job is
    /// in flight terminates the child (graceful then hard kill) and reports
    /// `error_kind=worker_shutdown` instead of running to completion (spec
    /// §5's SIGTERM cancellation contract).
    pub async fn run_cancelable(
        &self,
        job: &JobMessage,
        sink: &dyn ResultSink,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> Outcome {
        let job_id = job.job_id.clone();
        let workspace = self.layout.job_workspace(&job_id);
        let done_path = self.layout.job_done_json(&job_id);

        let event = match std::fs::read(&done_path)
            .ok()
            .and_then(|bytes| serde_json::from_slice::<ResultEvent>(&bytes).ok())
        {
            Some(event) => {
                tracing::info!(%job_id, "idempotence: replaying cached terminal event");
                event
            }
            None => self.execute(job, &workspace, sink, &mut shutdown).await,
        };

        if let Ok(bytes) = serde_json::to_vec(&event) {
            if let Err(e) = hpcq_core::layout::write_atomic(&done_path, &bytes) {
                tracing::warn!(%job_id, error = %e, "failed to persist done.json");
            }
        }

        let emitted = emit_with_retry(sink, &event).await;
        Outcome { event, emitted }
    }

    async fn execute(
        &self,
        job: &JobMessage,
        workspace: &Path,
        sink: &dyn ResultSink,
        shutdown: &mut tokio::sync::watch::Receiver<bool>,
    ) -> ResultEvent {
        let job_id = job.job_id.clone();
        let started = Instant::now();
        let input = job.input();

        if let Err(e) = self.setup_workspace(job, workspace) {
            return failed_event(job_id, None, ErrorKind::InvalidInput, e, started.elapsed());
        }

        let Some(shell_command) = effective_shell_command(&input) else {
            return failed_event(
                job_id,
                None,
                ErrorKind::InvalidInput,
                "job input has neither `command` nor `file_name`".to_string(),
                started.elapsed(),
            );
        };

        let mode = input.exec_mode();
        let (program, args) = build_argv(
            mode,
            &self.config.apptainer_bin,
            &self.config.apptainer_image,
            workspace,
            &self.config.extra_mounts,
            &shell_command,
        );

        let stdout_log = self.layout.job_stdout_log(&job_id);
        let stderr_log = self.layout.job_stderr_log(&job_id);

        let mut cmd = tokio::process::Command::new(&program);
        cmd.args(&args)
            .current_dir(workspace)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                return failed_event(job_id, None, ErrorKind::LaunchFailed, e.to_string(), started.elapsed());
            }
        };

        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");

        let stdout_state = Arc::new(StdMutex::new(StreamState::new(hpcq_core::model::TAIL_BYTES)));
        let stderr_state = Arc::new(StdMutex::new(StreamState::new(hpcq_core::model::TAIL_BYTES)));

        let stdout_task = tokio::spawn(pump(stdout, stdout_log, stdout_state.clone()));
        let stderr_task = tokio::spawn(pump(stderr, stderr_log, stderr_state.clone()));

        let timeout = Duration::from_secs(input.timeout_seconds());
        let (status, outcome) = self
            .supervise(&mut child, timeout, &job_id, &stdout_state, &stderr_state, sink, shutdown)
            .await;

        let _ = stdout_task.await;
        let _ = stderr_task.await;

        let (stdout_tail, stderr_tail) = {
            let out = stdout_state.lock().unwrap();
            let err = stderr_state.lock().unwrap();
            (out.tail_string(), err.tail_string())
        };

        let duration = started.elapsed();

        match outcome {
            SuperviseOutcome::TimedOut => {
                return ResultEvent::Failed {
                    job_id,
                    exit_code: status.as_ref().and_then(exit_code_of),
                    error_kind: ErrorKind::Timeout,
                    error_detail: "wall-clock timeout exceeded".to_string(),
                    duration_seconds: duration.as_secs_f64(),
                    stdout_tail,
                    stderr_tail,
                    timestamp: Utc::now(),
                };
            }
            SuperviseOutcome::ShuttingDown => {
                return ResultEvent::Failed {
                    job_id,
                    exit_code: status.as_ref().and_then(exit_code_of),
                    error_kind: ErrorKind::WorkerShutdown,
                    error_detail: "terminated by SIGTERM while running".to_string(),
                    duration_seconds: duration.as_secs_f64(),
                    stdout_tail,
                    stderr_tail,
                    timestamp: Utc::now(),
                };
            }
            SuperviseOutcome::Completed => {}
        }

        let status = match status {
            Some(s) => s,
            None => {
                return failed_event(
                    job_id,
                    None,
                    ErrorKind::LaunchFailed,
                    "process exited without a status".to_string(),
                    duration,
                )
                .with_tails(stdout_tail, stderr_tail);
            }
        };

        if status.success() {
            let result_pointer = self.read_result_pointer(&job_id);
            ResultEvent::Completed {
                job_id,
                exit_code: 0,
                duration_seconds: duration.as_secs_f64(),
                stdout_tail,
                stderr_tail,
                result_pointer,
                timestamp: Utc::now(),
            }
        } else {
            ResultEvent::Failed {
                job_id,
                exit_code: exit_code_of(&status),
                error_kind: ErrorKind::NonzeroExit,
                error_detail: format!("process exited with {status}"),
                duration_seconds: duration.as_secs_f64(),
                stdout_tail,
                stderr_tail,
                timestamp: Utc::now(),
            }
        }
    }

    /// Wait for the child, emitting periodic `running` events and
    /// enforcing the timeout. Returns the exit status (if the process was
    /// reaped) and whether termination was due to the timeout.
    #[allow(clippy::too_many_arguments)]
    async fn supervise(
        &self,
        child: &mut Child,
        timeout: Duration,
        job_id: &JobId,
        stdout_state: &Arc<StdMutex<StreamState>>,
        stderr_state: &Arc<StdMutex<StreamState>>,
        sink: &dyn ResultSink,
        shutdown: &mut tokio::sync::watch::Receiver<bool>,
    ) -> (Option<std::process::ExitStatus>, SuperviseOutcome) {
        if *shutdown.borrow() {
            return (self.kill_gracefully(child).await, SuperviseOutcome::ShuttingDown);
        }

        let deadline = Instant::now() + timeout;
        let mut next_tail = Instant::now() + self.config.tail_interval;

        loop {
            let now = Instant::now();
            if now >= deadline {
                return (self.kill_gracefully(child).await, SuperviseOutcome::TimedOut);
            }

            let until_tail = next_tail.saturating_duration_since(now);
            let until_deadline = deadline.saturating_duration_since(now);
            let sleep_for = until_tail.min(until_deadline);

            tokio::select! {
                status = child.wait() => {
                    return (status.ok(), SuperviseOutcome::Completed);
                }
                _ = tokio::time::sleep(sleep_for) => {
                    if Instant::now() >= next_tail {
                        emit_running(sink, job_id, stdout_state, stderr_state).await;
                        next_tail = Instant::now() + self.config.tail_interval;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_ok() && *shutdown.borrow() {
                        return (self.kill_gracefully(child).await, SuperviseOutcome::ShuttingDown);
                    }
                }
            }
        }
    }

    async fn kill_gracefully(&self, child: &mut Child) -> Option<std::process::ExitStatus> {
        if let Some(pid) = child.id() {
            let _ = tokio::process::Command::new("kill")
                .arg("-TERM")
                .arg(pid.to_string())
                .status()
                .await;
        }

        match tokio::time::timeout(self.config.kill_grace, child.wait()).await {
            Ok(status) => status.ok(),
            Err(_) => {
                let _ = child.start_kill();
                child.wait().await.ok()
            }
        }
    }

    fn setup_workspace(&self, job: &JobMessage, workspace: &Path) -> Result<(), String> {
        std::fs::create_dir_all(workspace).map_err(|e| e.to_string())?;

        let input_json = serde_json::to_vec_pretty(&job.input).map_err(|e| e.to_string())?;
        hpcq_core::layout::write_atomic(&self.layout.job_input_json(&job.job_id), &input_json)
            .map_err(|e| e.to_string())?;

        std::fs::write(self.layout.job_stdout_log(&job.job_id), b"").map_err(|e| e.to_string())?;
        std::fs::write(self.layout.job_stderr_log(&job.job_id), b"").map_err(|e| e.to_string())?;

        let input = job.input();
        if let (Some(file_name), Some(content_b64)) = (input.file_name(), input.file_content_b64()) {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(content_b64)
                .map_err(|e| format!("bad file_content_b64: {e}"))?;
            let path = workspace.join(file_name);
            std::fs::write(&path, &bytes).map_err(|e| e.to_string())?;
            if input.runner() == Some("") {
                make_executable(&path).map_err(|e| e.to_string())?;
            }
        }

        Ok(())
    }

    fn read_result_pointer(&self, job_id: &JobId) -> Option<String> {
        let path = self.layout.job_output_json(job_id);
        path.exists().then(|| path.display().to_string())
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(perms.mode() | 0o111);
    std::fs::set_permissions(path, perms)
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

fn exit_code_of(status: &std::process::ExitStatus) -> Option<i32> {
    status.code()
}

fn failed_event(job_id: JobId, exit_code: Option<i32>, kind: ErrorKind, detail: String, elapsed: Duration) -> ResultEvent {
    ResultEvent::Failed {
        job_id,
        exit_code,
        error_kind: kind,
        error_detail: detail,
        duration_seconds: elapsed.as_secs_f64(),
        stdout_tail: String::new(),
        stderr_tail: String::new(),
        timestamp: Utc::now(),
    }
}

trait WithTails {
    fn with_tails(self, stdout_tail: String, stderr_tail: String) -> Self;
}

impl WithTails for ResultEvent {
    fn with_tails(self, stdout_tail: String, stderr_tail: String) -> Self {
        match self {
            ResultEvent::Failed {
                job_id,
                exit_code,
                error_kind,
                error_detail,
                duration_seconds,
                timestamp,
                ..
            } => ResultEvent::Failed {
                job_id,
                exit_code,
                error_kind,
                error_detail,
                duration_seconds,
                stdout_tail,
                stderr_tail,
                timestamp,
            },
            other => other,
        }
    }
}

async fn pump(mut reader: impl tokio::io::AsyncRead + Unpin, log_path: PathBuf, state: Arc<StdMutex<StreamState>>) {
    let mut log = match tokio::fs::OpenOptions::new().create(true).append(true).open(&log_path).await {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!(path = ?log_path, error = %e, "failed to open log file for append");
            return;
        }
    };

    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if let Err(e) = log.write_all(&buf[..n]).await {
                    tracing::warn!(error = %e, "failed writing captured output to log");
                }
                state.lock().unwrap().push(&buf[..n]);
            }
            Err(_) => break,
        }
    }
    let _ = log.flush().await;
}

/// Emit a `running` event best-effort: log and drop failures, never retried
/// (spec §7: "their send failures are logged and dropped").
async fn emit_running(
    sink: &dyn ResultSink,
    job_id: &JobId,
    stdout_state: &Arc<StdMutex<StreamState>>,
    stderr_state: &Arc<StdMutex<StreamState>>,
) {
    let (stdout_tail, bytes_read_stdout, stderr_tail, bytes_read_stderr) = {
        let out = stdout_state.lock().unwrap();
        let err = stderr_state.lock().unwrap();
        (out.tail_string(), out.bytes_read, err.tail_string(), err.bytes_read)
    };

    let event = ResultEvent::Running {
        job_id: job_id.clone(),
        stdout_tail,
        stderr_tail,
        bytes_read_stdout,
        bytes_read_stderr,
        timestamp: Utc::now(),
    };

    if let Err(e) = sink.emit(&event).await {
        tracing::warn!(%job_id, error = %e, "failed to emit running event, dropping");
    }
}

/// Emit a terminal event with up to 5 attempts, full-jitter exponential
/// backoff (same policy as the queue client's 429 handling).
async fn emit_with_retry(sink: &dyn ResultSink, event: &ResultEvent) -> bool {
    let mut rng = rand::thread_rng();
    for attempt in 1..=5u32 {
        match sink.emit(event).await {
            Ok(()) => return true,
            Err(e) => {
                tracing::warn!(attempt, error = %e, "failed to enqueue terminal event");
                if attempt < 5 {
                    tokio::time::sleep(hpcq_queue_client::backoff_delay(attempt, &mut rng)).await;
                }
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::test_support::RecordingSink;

    fn make_job(input: serde_json::Value) -> JobMessage {
        JobMessage {
            job_id: JobId::new_unchecked("nebula-otter-1a2b3c"),
            input,
            created_at: Utc::now(),
            metadata: serde_json::Value::Null,
        }
    }

    fn executor(dir: &std::path::Path) -> Executor {
        let config = ExecutorConfig::new("apptainer", dir.join("runtime").join("image.sif"));
        Executor::new(config, Layout::under(dir.to_path_buf()))
    }

    #[tokio::test]
    async fn s1_host_echo_completes() {
        let dir = tempfile::tempdir().unwrap();
        let job = make_job(serde_json::json!({"exec_mode": "host", "command": "echo endpoint-ok"}));
        let sink = RecordingSink::default();
        let outcome = executor(dir.path()).run(&job, &sink).await;
        match outcome.event {
            ResultEvent::Completed { exit_code, stdout_tail, .. } => {
                assert_eq!(exit_code, 0);
                assert_eq!(stdout_tail, "endpoint-ok\n");
            }
            other => panic!("expected Completed, got {other:?}"),
        }
        assert!(outcome.emitted);
    }

    #[tokio::test]
    async fn s2_nonzero_exit_is_failed() {
        let dir = tempfile::tempdir().unwrap();
        let job = make_job(serde_json::json!({"exec_mode": "host", "command": "false"}));
        let sink = RecordingSink::default();
        let outcome = executor(dir.path()).run(&job, &sink).await;
        match outcome.event {
            ResultEvent::Failed { error_kind, exit_code, .. } => {
                assert_eq!(error_kind, ErrorKind::NonzeroExit);
                assert_eq!(exit_code, Some(1));
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn s3_timeout_kills_and_reports() {
        let dir = tempfile::tempdir().unwrap();
        let job = make_job(serde_json::json!({"exec_mode": "host", "command": "sleep 30", "timeout_seconds": 1}));
        let mut ex = executor(dir.path());
        ex.config.tail_interval = Duration::from_secs(100);
        ex.config.kill_grace = Duration::from_millis(500);
        let sink = RecordingSink::default();
        let outcome = ex.run(&job, &sink).await;
        match outcome.event {
            ResultEvent::Failed { error_kind, duration_seconds, .. } => {
                assert_eq!(error_kind, ErrorKind::Timeout);
                assert!(duration_seconds < 8.0);
            }
            other => panic!("expected Failed(timeout), got {other:?}"),
        }
    }

    #[tokio::test]
    async fn s5_file_upload_runs_via_runner() {
        let dir = tempfile::tempdir().unwrap();
        let content = base64::engine::general_purpose::STANDARD.encode("echo 42");
        let job = make_job(serde_json::json!({
            "exec_mode": "host",
            "runner": "bash",
            "file_name": "job.sh",
            "file_content_b64": content,
        }));
        let sink = RecordingSink::default();
        let outcome = executor(dir.path()).run(&job, &sink).await;
        match outcome.event {
            ResultEvent::Completed { stdout_tail, .. } => assert_eq!(stdout_tail, "42\n"),
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn idempotence_replays_cached_terminal_event() {
        let dir = tempfile::tempdir().unwrap();
        let job = make_job(serde_json::json!({"exec_mode": "host", "command": "echo first"}));
        let ex = executor(dir.path());
        let sink = RecordingSink::default();

        let first = ex.run(&job, &sink).await;
        let second_job = make_job(serde_json::json!({"exec_mode": "host", "command": "echo second"}));
        let second_job = JobMessage { job_id: job.job_id.clone(), ..second_job };
        let second = ex.run(&second_job, &sink).await;

        let (ResultEvent::Completed { stdout_tail: a, .. }, ResultEvent::Completed { stdout_tail: b, .. }) =
            (first.event, second.event)
        else {
            panic!("expected both attempts to complete");
        };
        assert_eq!(a, "first\n");
        assert_eq!(b, "first\n", "replayed event must match the original, not re-execute");
    }
}
