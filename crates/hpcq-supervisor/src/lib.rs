#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

//! The Supervisor (spec §4.7): restart-on-crash child process management
//! for the Pull Consumer Loop, with exponential backoff and signal
//! forwarding.

pub mod backoff;
pub mod supervisor;

pub use supervisor::{run, SupervisorConfig};
