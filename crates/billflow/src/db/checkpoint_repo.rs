//! Checkpoint repository for the `workflow_checkpoints` table.
//!
//! Functions take a plain `Connection` so they compose inside a
//! transaction.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{format_timestamp, parse_timestamp, DatabaseError};
use crate::checkpoint::WorkflowStep;
use crate::store::WorkflowCheckpoint;

const TABLE: &str = "workflow_checkpoints";

const COLUMNS: &str = "id, workflow_id, step, payload, created_at, consumed, consumed_at";

/// A raw checkpoint row from the database.
#[derive(Debug, Clone)]
struct CheckpointRow {
    id: String,
    workflow_id: String,
    step: String,
    payload: String,
    created_at: String,
    consumed: bool,
    consumed_at: Option<String>,
}

impl CheckpointRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            workflow_id: row.get("workflow_id")?,
            step: row.get("step")?,
            payload: row.get("payload")?,
            created_at: row.get("created_at")?,
            consumed: row.get("consumed")?,
            consumed_at: row.get("consumed_at")?,
        })
    }

    fn into_checkpoint(self) -> Result<WorkflowCheckpoint, DatabaseError> {
        let step = self
            .step
            .parse::<WorkflowStep>()
            .map_err(|reason| DatabaseError::InvalidRow { table: TABLE, reason })?;
        let payload =
            serde_json::from_str(&self.payload).map_err(|e| DatabaseError::InvalidRow {
                table: TABLE,
                reason: format!("bad payload: {}", e),
            })?;

        Ok(WorkflowCheckpoint {
            id: self.id,
            workflow_id: self.workflow_id,
            step,
            payload,
            created_at: parse_timestamp(TABLE, &self.created_at)?,
            consumed: self.consumed,
            consumed_at: self
                .consumed_at
                .as_deref()
                .map(|raw| parse_timestamp(TABLE, raw))
                .transpose()?,
        })
    }
}

/// Inserts a checkpoint. A second live checkpoint for the same workflow
/// violates the partial unique index.
pub fn insert(conn: &Connection, checkpoint: &WorkflowCheckpoint) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO workflow_checkpoints (id, workflow_id, step, payload, created_at, consumed, consumed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            checkpoint.id,
            checkpoint.workflow_id,
            checkpoint.step.as_str(),
            checkpoint.payload.to_string(),
            format_timestamp(&checkpoint.created_at),
            checkpoint.consumed,
            checkpoint.consumed_at.as_ref().map(format_timestamp),
        ],
    )?;
    Ok(())
}

pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<WorkflowCheckpoint>, DatabaseError> {
    let sql = format!("SELECT {} FROM workflow_checkpoints WHERE id = ?1", COLUMNS);
    conn.query_row(&sql, params![id], CheckpointRow::from_row)
        .optional()?
        .map(CheckpointRow::into_checkpoint)
        .transpose()
}

pub fn find_live(
    conn: &Connection,
    workflow_id: &str,
) -> Result<Option<WorkflowCheckpoint>, DatabaseError> {
    let sql = format!(
        "SELECT {} FROM workflow_checkpoints WHERE workflow_id = ?1 AND consumed = 0",
        COLUMNS
    );
    conn.query_row(&sql, params![workflow_id], CheckpointRow::from_row)
        .optional()?
        .map(CheckpointRow::into_checkpoint)
        .transpose()
}

/// All checkpoints of a workflow in insertion order.
pub fn list_for_workflow(
    conn: &Connection,
    workflow_id: &str,
) -> Result<Vec<WorkflowCheckpoint>, DatabaseError> {
    let sql = format!(
        "SELECT {} FROM workflow_checkpoints WHERE workflow_id = ?1 ORDER BY rowid",
        COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![workflow_id], CheckpointRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(CheckpointRow::into_checkpoint).collect()
}

/// Flips `consumed` from 0 to 1. Returns false when the checkpoint is
/// missing or was already consumed.
pub fn mark_consumed(
    conn: &Connection,
    id: &str,
    consumed_at: &DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE workflow_checkpoints SET consumed = 1, consumed_at = ?2
         WHERE id = ?1 AND consumed = 0",
        params![id, format_timestamp(consumed_at)],
    )?;
    Ok(changed == 1)
}
