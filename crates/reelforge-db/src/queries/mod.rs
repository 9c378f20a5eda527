//! Database query modules.
//!
//! - tasks: task creation, claiming, progress and terminal updates, paging

pub mod tasks;
