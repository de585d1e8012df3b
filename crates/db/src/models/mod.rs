//! Row structs mapping database tables onto core types.

pub mod task;
