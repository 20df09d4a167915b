#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

//! The Job Executor (spec §4.4) and the command-assembly/tail-buffer
//! helpers it's built from.

pub mod command;
pub mod executor;
pub mod sink;
pub mod tail;

pub use executor::{Executor, ExecutorConfig, Outcome};
pub use sink::{QueueResultSink, ResultSink, SinkError};
