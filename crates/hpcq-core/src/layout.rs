//! The on-disk persisted tree (spec §6.5) and the atomic-write idiom used
//! everywhere something is written that must never be observed half-done:
//! write to `<path>.tmp`, `fsync`-free rename over the final path. The same
//! sequence the teacher uses for its submitter config and inflight-lease
//! cache.

use std::path::{Path, PathBuf};

use crate::model::JobId;

/// Root paths the rest of the workspace is built from. Each component
/// constructs one of these from its `Config` at startup; tests construct it
/// directly over a tempdir.
#[derive(Debug, Clone)]
pub struct Layout {
    /// `<repo>/hpc-consumer/results` — per-job executor workspaces.
    pub results_root: PathBuf,
    /// `<repo>/local-results` — local-side result artefacts.
    pub local_results_root: PathBuf,
    /// `<repo>/runtime` — container image + digest sidecar.
    pub runtime_root: PathBuf,
}

impl Layout {
    pub fn under(repo_root: impl Into<PathBuf>) -> Self {
        let repo_root = repo_root.into();
        Self {
            results_root: repo_root.join("hpc-consumer").join("results"),
            local_results_root: repo_root.join("local-results"),
            runtime_root: repo_root.join("runtime"),
        }
    }

    /// `hpc-consumer/results/<job_id>/` — owned by the Executor for the
    /// job's duration.
    pub fn job_workspace(&self, job_id: &JobId) -> PathBuf {
        self.results_root.join(job_id.as_str())
    }

    pub fn job_input_json(&self, job_id: &JobId) -> PathBuf {
        self.job_workspace(job_id).join("input.json")
    }

    pub fn job_stdout_log(&self, job_id: &JobId) -> PathBuf {
        self.job_workspace(job_id).join("stdout.log")
    }

    pub fn job_stderr_log(&self, job_id: &JobId) -> PathBuf {
        self.job_workspace(job_id).join("stderr.log")
    }

    pub fn job_output_json(&self, job_id: &JobId) -> PathBuf {
        self.job_workspace(job_id).join("output.json")
    }

    /// Idempotence marker: presence means the job already produced a
    /// terminal event.
    pub fn job_done_json(&self, job_id: &JobId) -> PathBuf {
        self.job_workspace(job_id).join("done.json")
    }

    pub fn local_result_json(&self, job_id: &JobId) -> PathBuf {
        self.local_results_root.join(format!("{job_id}.json"))
    }

    pub fn local_stdout_log(&self, job_id: &JobId) -> PathBuf {
        self.local_results_root.join(format!("{job_id}.stdout.log"))
    }

    pub fn local_stderr_log(&self, job_id: &JobId) -> PathBuf {
        self.local_results_root.join(format!("{job_id}.stderr.log"))
    }

    /// Heartbeat/in-flight snapshot the CLI's `status` operation reads.
    pub fn local_status_json(&self) -> PathBuf {
        self.local_results_root.join("_status.json")
    }

    pub fn image_path(&self, image_file_name: &str) -> PathBuf {
        self.runtime_root.join(image_file_name)
    }

    pub fn digest_sidecar_path(&self, image_file_name: &str) -> PathBuf {
        self.runtime_root.join(format!("{image_file_name}.digest"))
    }

    /// Supervisor PID file (spec §4.7).
    pub fn supervisor_pid_file(&self) -> PathBuf {
        self.runtime_root.join("supervisor.pid")
    }
}

/// Write `contents` atomically to `path`: write a sibling `.tmp` file, then
/// rename it over `path`. Creates parent directories as needed. Callers
/// that must guarantee "never both files reflect a half-completed write"
/// (the digest sidecar invariant) rely on this being the only way anything
/// in this crate graph writes a file that matters.
pub fn write_atomic(path: &Path, contents: impl AsRef<[u8]>) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let tmp = path.with_extension(tmp_extension(path));
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn tmp_extension(path: &Path) -> String {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{ext}.tmp"),
        None => "tmp".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_atomic_creates_parents_and_leaves_no_tmp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a").join("b").join("file.json");
        write_atomic(&path, b"{}").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"{}");
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn job_paths_are_scoped_under_job_id() {
        let layout = Layout::under("/repo");
        let job_id = JobId::new("nebula-otter-1a2b3c").unwrap();
        assert_eq!(
            layout.job_workspace(&job_id),
            PathBuf::from("/repo/hpc-consumer/results/nebula-otter-1a2b3c")
        );
        assert_eq!(
            layout.local_result_json(&job_id),
            PathBuf::from("/repo/local-results/nebula-otter-1a2b3c.json")
        );
    }
}
