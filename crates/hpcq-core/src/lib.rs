#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

//! Shared data model, error taxonomy, persisted-tree layout, and
//! environment-driven configuration for every `hpcq-*` crate.

pub mod config;
pub mod error;
pub mod layout;
pub mod model;
pub mod shortid;

pub use error::ErrorKind;
pub use layout::Layout;
pub use model::{ExecMode, JobId, JobInput, JobMessage, Lease, ResultEvent, StatusSnapshot};
