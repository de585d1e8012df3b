//! External process execution.
//!
//! [`CommandExecutor`] spawns an argument vector with tokio, captures both
//! output streams, and waits for exit while watching a
//! [`CancellationToken`](tokio_util::sync::CancellationToken). It never
//! interprets exit codes; that is the router's job.

pub mod executor;
pub mod subprocess;

pub use executor::{CommandExecutor, ExecError, ProcessExecutor, ProcessOutput};
