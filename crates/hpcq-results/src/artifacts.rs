//! Local artefact writer (spec §4.6): append deduplicated log tails, write
//! terminal `<job_id>.json` atomically, and persist the heartbeat status
//! snapshot the CLI reads.
//!
//! Grounded on `hpcq_core::layout`'s atomic-write idiom (used unchanged here
//! for the terminal/status files) plus the rolling-tail char-boundary
//! back-off already proven out in `hpcq-executor::tail`.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use hpcq_core::{JobId, Layout, ResultEvent, StatusSnapshot};

/// Append the portion of `tail` not already reflected in the log file at
/// `path`, using the file's current length as the last-known absolute byte
/// offset. Dedup is approximate across process restarts (the file length IS
/// the offset), but exact within one consumer's lifetime.
///
/// If the stream produced more bytes since the last write than `tail` can
/// cover (the rolling window dropped some), the gap is unrecoverable by
/// design (spec §4.4's tail is bounded) and only the available bytes are
/// appended.
pub fn append_tail(path: &Path, tail: &str, bytes_read: u64) -> std::io::Result<()> {
    let existing_len = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    if bytes_read <= existing_len {
        return Ok(());
    }

    let new_bytes = (bytes_read - existing_len) as usize;
    let tail_bytes = tail.as_bytes();
    let mut start = tail_bytes.len().saturating_sub(new_bytes.min(tail_bytes.len()));
    while start < tail_bytes.len() && !tail.is_char_boundary(start) {
        start += 1;
    }

    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let mut f = OpenOptions::new().create(true).append(true).open(path)?;
    f.write_all(&tail_bytes[start..])
}

/// Apply one result event to the local artefact tree: append tails,
/// atomically write the terminal file on completion/failure.
pub fn apply_event(layout: &Layout, event: &ResultEvent) -> std::io::Result<()> {
    match event {
        ResultEvent::Running {
            job_id,
            stdout_tail,
            stderr_tail,
            bytes_read_stdout,
            bytes_read_stderr,
            ..
        } => {
            append_tail(&layout.local_stdout_log(job_id), stdout_tail, *bytes_read_stdout)?;
            append_tail(&layout.local_stderr_log(job_id), stderr_tail, *bytes_read_stderr)?;
            Ok(())
        }
        ResultEvent::Completed {
            job_id,
            stdout_tail,
            stderr_tail,
            ..
        } => {
            // bytes_read_* aren't carried on terminal events; append whatever
            // tail remains unconditionally, since this is the last write for
            // the job and a few duplicated trailing bytes are harmless.
            append_unconditional(&layout.local_stdout_log(job_id), stdout_tail)?;
            append_unconditional(&layout.local_stderr_log(job_id), stderr_tail)?;
            write_terminal(layout, job_id, event)
        }
        ResultEvent::Failed {
            job_id,
            stdout_tail,
            stderr_tail,
            ..
        } => {
            append_unconditional(&layout.local_stdout_log(job_id), stdout_tail)?;
            append_unconditional(&layout.local_stderr_log(job_id), stderr_tail)?;
            write_terminal(layout, job_id, event)
        }
        ResultEvent::Heartbeat { .. } => Ok(()),
    }
}

fn append_unconditional(path: &Path, tail: &str) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let mut f = OpenOptions::new().create(true).append(true).open(path)?;
    f.write_all(tail.as_bytes())
}

fn write_terminal(layout: &Layout, job_id: &JobId, event: &ResultEvent) -> std::io::Result<()> {
    let body = serde_json::to_vec_pretty(event).unwrap_or_default();
    hpcq_core::layout::write_atomic(&layout.local_result_json(job_id), body)
}

/// Persist the latest heartbeat as the CLI status snapshot.
pub fn write_status(layout: &Layout, snapshot: &StatusSnapshot) -> std::io::Result<()> {
    let body = serde_json::to_vec_pretty(snapshot).unwrap_or_default();
    hpcq_core::layout::write_atomic(&layout.local_status_json(), body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_tail_skips_already_covered_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.stdout.log");
        append_tail(&path, "hello", 5).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello");

        // Same cumulative byte count again: no duplicate append.
        append_tail(&path, "hello", 5).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello");
    }

    #[test]
    fn append_tail_appends_only_new_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.stdout.log");
        append_tail(&path, "hello", 5).unwrap();
        // 5 more bytes produced; tail window now covers "lo wor" (6 chars)
        // but only the last 5 are genuinely new.
        append_tail(&path, "lo wor", 10).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello wor");
    }

    #[test]
    fn apply_event_writes_terminal_json_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::under(dir.path());
        let job_id = JobId::new("nebula-otter-1a2b3c").unwrap();
        let event = ResultEvent::Completed {
            job_id: job_id.clone(),
            exit_code: 0,
            duration_seconds: 1.5,
            stdout_tail: "ok".to_string(),
            stderr_tail: String::new(),
            result_pointer: None,
            timestamp: chrono::Utc::now(),
        };
        apply_event(&layout, &event).unwrap();
        assert!(layout.local_result_json(&job_id).exists());
        assert!(!layout.local_result_json(&job_id).with_extension("json.tmp").exists());
    }
}
