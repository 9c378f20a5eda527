//! Reelforge-DB: Database schema, migrations, and query operations
//!
//! This crate provides task persistence for reelforge using SQLite
//! with rusqlite and r2d2 connection pooling.
//!
//! # Modules
//!
//! - `migrations` - Database schema migrations
//! - `pool` - Connection pool management
//! - `models` - Rust models matching database schema
//! - `queries` - Database query operations
//!
//! # Example
//!
//! ```no_run
//! use reelforge_common::{TaskKind, TaskParams};
//! use reelforge_db::pool::{init_pool, get_conn};
//! use reelforge_db::queries::tasks;
//!
//! let pool = init_pool("/var/lib/reelforge/reelforge.db").unwrap();
//! let conn = get_conn(&pool).unwrap();
//!
//! let task = tasks::create_task(&conn, TaskKind::ImageSlideshow, &TaskParams::default()).unwrap();
//! println!("Created task: {}", task.id);
//! ```

pub mod migrations;
pub mod models;
pub mod pool;
pub mod queries;
