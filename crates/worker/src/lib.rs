//! Task worker: polls the task store, runs tasks through the command
//! router with bounded concurrency, and serves finished results.

pub mod config;
pub mod intake;
pub mod results;
pub mod router;
pub mod scheduler;
