//! Schema for checkpoints and resume tokens.
//!
//! Applied versions are recorded in `_migrations`; `run_all` only executes
//! versions above the highest recorded one.

use rusqlite::Connection;

use super::error::DatabaseError;

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

/// Ascending by version.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_workflow_checkpoints_table",
        sql: "CREATE TABLE workflow_checkpoints (
                id TEXT PRIMARY KEY NOT NULL,
                workflow_id TEXT NOT NULL,
                step TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at TEXT NOT NULL,
                consumed INTEGER NOT NULL DEFAULT 0,
                consumed_at TEXT
              );
              CREATE INDEX idx_workflow_checkpoints_workflow
                ON workflow_checkpoints (workflow_id);",
    },
    Migration {
        version: 2,
        description: "create_resume_tokens_table",
        sql: "CREATE TABLE resume_tokens (
                token_hash TEXT PRIMARY KEY NOT NULL,
                workflow_id TEXT NOT NULL,
                checkpoint_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                consumed INTEGER NOT NULL DEFAULT 0,
                consumed_at TEXT
              );
              CREATE INDEX idx_resume_tokens_checkpoint
                ON resume_tokens (checkpoint_id);",
    },
    Migration {
        version: 3,
        description: "unique_live_checkpoint_per_workflow",
        sql: "CREATE UNIQUE INDEX idx_workflow_checkpoints_live
                ON workflow_checkpoints (workflow_id) WHERE consumed = 0;",
    },
];

/// Brings `conn` up to the latest schema version.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current_version: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;

    for migration in MIGRATIONS {
        if migration.version <= current_version {
            continue;
        }

        log::info!(
            "Running migration v{}: {}",
            migration.version,
            migration.description
        );

        conn.execute_batch(migration.sql)
            .map_err(|e| DatabaseError::Migration {
                version: migration.version,
                reason: e.to_string(),
            })?;

        conn.execute(
            "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
            rusqlite::params![migration.version, migration.description],
        )?;
    }

    Ok(())
}
