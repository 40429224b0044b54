//! Processed message repository: CRUD operations for the `processed_messages` table.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A raw processed message row. Timestamps are RFC 3339 strings and the
/// attachment paths a JSON array, exactly as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordRow {
    pub message_id: String,
    pub subject: String,
    pub sender: String,
    pub recipient: Option<String>,
    pub received_at: String,
    pub processed_at: String,
    pub attachment_paths: String,
    pub folder: Option<String>,
}

const COLUMNS: &str =
    "message_id, subject, sender, recipient, received_at, processed_at, attachment_paths, folder";

fn from_row(row: &Row<'_>) -> rusqlite::Result<RecordRow> {
    Ok(RecordRow {
        message_id: row.get(0)?,
        subject: row.get(1)?,
        sender: row.get(2)?,
        recipient: row.get(3)?,
        received_at: row.get(4)?,
        processed_at: row.get(5)?,
        attachment_paths: row.get(6)?,
        folder: row.get(7)?,
    })
}

/// Inserts a record unless one with the same message id exists.
///
/// Returns `true` when a row was written.
pub fn insert(db: &Database, row: &RecordRow) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "INSERT OR IGNORE INTO processed_messages
                (message_id, subject, sender, recipient, received_at, processed_at,
                 attachment_paths, folder)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                row.message_id,
                row.subject,
                row.sender,
                row.recipient,
                row.received_at,
                row.processed_at,
                row.attachment_paths,
                row.folder,
            ],
        )?;
        Ok(changed > 0)
    })
}

pub fn exists(db: &Database, message_id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let found = conn
            .query_row(
                "SELECT 1 FROM processed_messages WHERE message_id = ?1",
                params![message_id],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    })
}

pub fn find(db: &Database, message_id: &str) -> Result<Option<RecordRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM processed_messages WHERE message_id = ?1",
                    COLUMNS
                ),
                params![message_id],
                from_row,
            )
            .optional()?;
        Ok(row)
    })
}

pub fn count(db: &Database) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 =
            conn.query_row("SELECT COUNT(*) FROM processed_messages", [], |r| r.get(0))?;
        Ok(count)
    })
}

/// The most recently processed records, newest first.
pub fn find_recent(db: &Database, limit: u32) -> Result<Vec<RecordRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM processed_messages
             ORDER BY processed_at DESC, message_id ASC LIMIT ?1",
            COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![limit], from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
