//! `q`'s argument surface (spec §6.3). Grounded on `client/src/cli.rs`'s
//! `clap::Parser` derive struct with `env` attributes, extended here with a
//! `Subcommand` enum since this CLI is multi-verb rather than single-mode.

use clap::{Parser, Subcommand, ValueEnum};
use hpcq_core::config::{ApiAuthConfig, ImageConfig, PathConfig, QueueConfig, QueueEndpointConfig};

fn default_batch_size() -> u32 {
    100
}

fn default_max_batches() -> u32 {
    200
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ClearTarget {
    Jobs,
    Results,
    All,
}

#[derive(Debug, Parser)]
#[command(name = "q", version, about = "HPC job queue control surface")]
pub struct Cli {
    #[command(flatten)]
    pub queue: QueueConfig,
    #[command(flatten)]
    pub queue_endpoint: QueueEndpointConfig,
    #[command(flatten)]
    pub image: ImageConfig,
    #[command(flatten)]
    pub paths: PathConfig,
    /// Only required by `start` (image refresh doesn't need it, but kept
    /// flattened here so every subcommand shares one config surface).
    #[command(flatten)]
    pub auth: ApiAuthConfig,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Ensure the runtime image is fresh, then launch supervisor+consumer.
    Start {
        /// Path to the `hpc-consumer` binary the supervisor should launch.
        #[arg(long, env = "HPC_CONSUMER_BIN", default_value = "hpc-consumer")]
        consumer_bin: String,
        /// Path to the `hpcq-supervisor` binary.
        #[arg(long, env = "HPCQ_SUPERVISOR_BIN", default_value = "hpcq-supervisor")]
        supervisor_bin: String,
    },
    /// Terminate the supervisor (and its consumer child).
    Stop {
        /// Also drain both queues via pull/ack loops after stopping.
        #[arg(long)]
        all: bool,
        #[arg(long, default_value_t = default_batch_size())]
        batch_size: u32,
        #[arg(long, default_value_t = default_max_batches())]
        max_batches: u32,
    },
    /// Print PID liveness, last heartbeat, and in-flight job id if any.
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Pull+ack loop to drain a queue (or both).
    Clear {
        target: ClearTarget,
        #[arg(long, default_value_t = default_batch_size())]
        batch_size: u32,
        #[arg(long, default_value_t = default_max_batches())]
        max_batches: u32,
    },
}
