//! Command assembly (spec §4.4 step 2): turn a Job Message's `input` into
//! the program + argv the executor actually spawns, for each of
//! `exec_mode=host`, `exec_mode=container`, and `run-file` jobs.

use std::path::Path;

use hpcq_core::{ExecMode, JobInput};

/// Resolve the shell command string to run. `run-file` jobs (signalled by
/// `file_name` being present) prepend the runner to the materialised file's
/// workspace-relative path, followed by `--`-separated user arguments taken
/// from `command`; plain jobs just use `command` verbatim.
pub fn effective_shell_command(input: &JobInput<'_>) -> Option<String> {
    if let Some(file_name) = input.file_name() {
        let runner = input.runner().unwrap_or("python");
        let path = format!("./{file_name}");
        let extra = input.command().unwrap_or("").trim();

        let mut cmd = if runner.is_empty() {
            path
        } else {
            format!("{runner} {path}")
        };
        if !extra.is_empty() {
            cmd.push_str(" -- ");
            cmd.push_str(extra);
        }
        Some(cmd)
    } else {
        input.command().map(str::to_string)
    }
}

/// Build the `(program, args)` pair the executor spawns: the host shell
/// directly for `exec_mode=host`, or the container runtime binary wrapping
/// the same shell invocation for `exec_mode=container` (spec §6.4).
pub fn build_argv(
    mode: ExecMode,
    apptainer_bin: &str,
    image_path: &Path,
    workspace: &Path,
    extra_mounts: &[(String, String)],
    shell_command: &str,
) -> (String, Vec<String>) {
    match mode {
        ExecMode::Host => (
            "/bin/sh".to_string(),
            vec!["-c".to_string(), shell_command.to_string()],
        ),
        ExecMode::Container => {
            let mut args = vec!["exec".to_string()];
            args.push("--bind".to_string());
            args.push(format!("{}:/work", workspace.display()));
            for (host_path, container_path) in extra_mounts {
                args.push("--bind".to_string());
                args.push(format!("{host_path}:{container_path}"));
            }
            args.push("--pwd".to_string());
            args.push("/work".to_string());
            args.push(image_path.display().to_string());
            args.push("/bin/sh".to_string());
            args.push("-c".to_string());
            args.push(shell_command.to_string());
            (apptainer_bin.to_string(), args)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn plain_command_passes_through() {
        let v = serde_json::json!({"command": "echo hi"});
        let input = JobInput(&v);
        assert_eq!(effective_shell_command(&input).as_deref(), Some("echo hi"));
    }

    #[test]
    fn run_file_with_runner_and_args() {
        let v = serde_json::json!({"runner": "bash", "file_name": "job.sh", "command": "--flag"});
        let input = JobInput(&v);
        assert_eq!(
            effective_shell_command(&input).as_deref(),
            Some("bash ./job.sh -- --flag")
        );
    }

    #[test]
    fn run_file_empty_runner_execs_directly() {
        let v = serde_json::json!({"runner": "", "file_name": "job.sh"});
        let input = JobInput(&v);
        assert_eq!(effective_shell_command(&input).as_deref(), Some("./job.sh"));
    }

    #[test]
    fn host_mode_has_no_bind_mounts() {
        let (program, args) = build_argv(
            ExecMode::Host,
            "apptainer",
            Path::new("/runtime/image.sif"),
            Path::new("/work/job1"),
            &[],
            "echo hi",
        );
        assert_eq!(program, "/bin/sh");
        assert_eq!(args, vec!["-c".to_string(), "echo hi".to_string()]);
    }

    #[test]
    fn container_mode_binds_workspace_and_image() {
        let (program, args) = build_argv(
            ExecMode::Container,
            "apptainer",
            Path::new("/runtime/image.sif"),
            Path::new("/work/job1"),
            &[("/data".to_string(), "/data".to_string())],
            "echo hi",
        );
        assert_eq!(program, "apptainer");
        assert_eq!(
            args,
            vec![
                "exec".to_string(),
                "--bind".to_string(),
                "/work/job1:/work".to_string(),
                "--bind".to_string(),
                "/data:/data".to_string(),
                "--pwd".to_string(),
                "/work".to_string(),
                PathBuf::from("/runtime/image.sif").display().to_string(),
                "/bin/sh".to_string(),
                "-c".to_string(),
                "echo hi".to_string(),
            ]
        );
    }
}
