//! Thin CLI entry point around [`hpcq_supervisor::run`]. Spawned detached by
//! `q start` (spec §6.3); daemonizes no further than writing its own PID
//! file and outliving the terminal that launched it.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use hpcq_core::config::PathConfig;
use hpcq_supervisor::SupervisorConfig;

fn default_hard_kill_grace() -> u64 {
    10
}

#[derive(Debug, Parser)]
#[command(name = "hpcq-supervisor", version, about = "Restart-on-crash supervisor for the HPC consumer loop")]
struct Cli {
    #[command(flatten)]
    paths: PathConfig,

    /// Path to the child binary to supervise (typically `hpc-consumer`).
    #[arg(long, env = "SUPERVISOR_CHILD_BIN")]
    child_bin: PathBuf,

    /// Arguments passed through to the child binary.
    #[arg(trailing_var_arg = true)]
    child_args: Vec<String>,

    /// Grace period before a hard kill once SIGTERM/SIGINT is forwarded.
    #[arg(long, env = "SUPERVISOR_HARD_KILL_GRACE_SECONDS", default_value_t = default_hard_kill_grace())]
    hard_kill_grace_seconds: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let layout = cli.paths.layout();

    let config = SupervisorConfig {
        child_bin: cli.child_bin,
        child_args: cli.child_args,
        pid_file: layout.supervisor_pid_file(),
        hard_kill_grace: Duration::from_secs(cli.hard_kill_grace_seconds),
    };

    hpcq_supervisor::run(config).await
}
