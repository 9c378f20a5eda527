//! Embedded schema migrations.
//!
//! Each migration is a SQL script compiled into the binary. Applied versions
//! are recorded in `schema_migrations`, so running the set again is a no-op.

use rusqlite::{params, Connection};
use thiserror::Error;

/// Migration error types
#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Migration {version} ({name}) failed: {message}")]
    Failed {
        version: usize,
        name: &'static str,
        message: String,
    },
}

struct Migration {
    version: usize,
    name: &'static str,
    sql: &'static str,
}

impl Migration {
    fn failed(&self, err: rusqlite::Error) -> MigrationError {
        MigrationError::Failed {
            version: self.version,
            name: self.name,
            message: err.to_string(),
        }
    }
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "initial",
    sql: include_str!("001_initial.sql"),
}];

fn ensure_migrations_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY NOT NULL,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )
}

fn applied_version(conn: &Connection) -> rusqlite::Result<usize> {
    conn.query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
        row.get::<_, Option<usize>>(0)
    })
    .map(|v| v.unwrap_or(0))
}

/// Run all pending migrations, each inside its own transaction.
///
/// Returns the number of migrations applied.
pub fn run_migrations(conn: &Connection) -> Result<usize, MigrationError> {
    ensure_migrations_table(conn)?;
    let current = applied_version(conn)?;

    let mut applied = 0;
    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(migration.sql)
            .map_err(|e| migration.failed(e))?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name) VALUES (?, ?)",
            params![migration.version, migration.name],
        )
        .map_err(|e| migration.failed(e))?;
        tx.commit().map_err(|e| migration.failed(e))?;

        tracing::info!(
            "Applied migration {}: {}",
            migration.version,
            migration.name
        );
        applied += 1;
    }

    Ok(applied)
}

/// Get the current schema version without applying migrations
pub fn current_version(conn: &Connection) -> Result<usize, MigrationError> {
    ensure_migrations_table(conn)?;
    Ok(applied_version(conn)?)
}

/// Get the latest available migration version
pub fn latest_version() -> usize {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}
