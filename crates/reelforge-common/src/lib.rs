//! Reelforge-Common: Shared types, IDs, and error definitions.
//!
//! This crate provides the vocabulary shared by every reelforge crate:
//!
//! - **Typed IDs**: [`TaskId`], a UUID newtype for composition tasks
//! - **Core Types**: task status and kind, semantic composition parameters,
//!   and the [`ProgressEvent`] snapshot broadcast to observers
//! - **Error Handling**: common error type and result alias
//!
//! # Examples
//!
//! ```
//! use reelforge_common::{TaskId, TaskParams, TaskStatus};
//!
//! let id = TaskId::new();
//! let params = TaskParams::default();
//!
//! assert_eq!(params.fps(), 25);
//! assert!(!TaskStatus::Processing.is_terminal());
//! # let _ = id;
//! ```

pub mod error;
pub mod ids;
pub mod types;

pub use error::{Error, Result};
pub use ids::*;
pub use types::*;
