//! Resume token repository for the `resume_tokens` table.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{format_timestamp, parse_timestamp, DatabaseError};
use crate::store::ResumeTokenRecord;

const TABLE: &str = "resume_tokens";

pub fn insert(conn: &Connection, token: &ResumeTokenRecord) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO resume_tokens (token_hash, workflow_id, checkpoint_id, created_at, expires_at, consumed, consumed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            token.token_hash,
            token.workflow_id,
            token.checkpoint_id,
            format_timestamp(&token.created_at),
            format_timestamp(&token.expires_at),
            token.consumed,
            token.consumed_at.as_ref().map(format_timestamp),
        ],
    )?;
    Ok(())
}

/// Finds a token by the hash of its value.
pub fn find(conn: &Connection, token_hash: &str) -> Result<Option<ResumeTokenRecord>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT token_hash, workflow_id, checkpoint_id, created_at, expires_at, consumed, consumed_at
             FROM resume_tokens WHERE token_hash = ?1",
            params![token_hash],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, bool>(5)?,
                    row.get::<_, Option<String>>(6)?,
                ))
            },
        )
        .optional()?;

    let Some((token_hash, workflow_id, checkpoint_id, created_at, expires_at, consumed, consumed_at)) =
        row
    else {
        return Ok(None);
    };

    Ok(Some(ResumeTokenRecord {
        token_hash,
        workflow_id,
        checkpoint_id,
        created_at: parse_timestamp(TABLE, &created_at)?,
        expires_at: parse_timestamp(TABLE, &expires_at)?,
        consumed,
        consumed_at: consumed_at
            .as_deref()
            .map(|raw| parse_timestamp(TABLE, raw))
            .transpose()?,
    }))
}

/// Compare-and-set on the consumed flag. Returns false when another caller
/// consumed the token first.
pub fn mark_consumed(
    conn: &Connection,
    token_hash: &str,
    consumed_at: &DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE resume_tokens SET consumed = 1, consumed_at = ?2
         WHERE token_hash = ?1 AND consumed = 0",
        params![token_hash, format_timestamp(consumed_at)],
    )?;
    Ok(changed == 1)
}
