//! Domain logic for the sequence-search task runner.
//!
//! Everything in this crate is free of database access: the task model and
//! its status machine, command templates and builders, the argument
//! tokenizer, the subprocess executor, the tabular hit parser, and the
//! [`store::TaskStore`] seam that persistence backends implement.

pub mod argv;
pub mod commands;
pub mod error;
pub mod exec;
pub mod hits;
pub mod outcome;
pub mod staging;
pub mod store;
pub mod task;
pub mod template;
pub mod types;
