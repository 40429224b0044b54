//! Metadata store for processed messages.
//!
//! One record per message id. Recording is idempotent: a second `record` for
//! the same id leaves the first record untouched.

use std::path::Path;

use chrono::{DateTime, Utc};
use log::debug;

use crate::db::record_repo::{self, RecordRow};
use crate::db::{Database, DatabaseError};
use crate::mail::Message;

/// Audit record written once a message has been handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedRecord {
    pub message_id: String,
    pub subject: String,
    pub sender: String,
    pub recipient: Option<String>,
    pub received_at: DateTime<Utc>,
    pub processed_at: DateTime<Utc>,
    /// Paths of the files written for this message.
    pub attachment_paths: Vec<String>,
    pub folder: Option<String>,
}

impl ProcessedRecord {
    pub fn from_message(
        message: &Message,
        attachment_paths: Vec<String>,
        processed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            message_id: message.id.clone(),
            subject: message.subject.clone(),
            sender: message.sender.clone(),
            recipient: message.recipient.clone(),
            received_at: message.received_at,
            processed_at,
            attachment_paths,
            folder: Some(message.folder.clone()).filter(|f| !f.is_empty()),
        }
    }

    fn to_row(&self) -> Result<RecordRow, DatabaseError> {
        Ok(RecordRow {
            message_id: self.message_id.clone(),
            subject: self.subject.clone(),
            sender: self.sender.clone(),
            recipient: self.recipient.clone(),
            received_at: self.received_at.to_rfc3339(),
            processed_at: self.processed_at.to_rfc3339(),
            attachment_paths: serde_json::to_string(&self.attachment_paths)?,
            folder: self.folder.clone(),
        })
    }

    fn from_row(row: RecordRow) -> Result<Self, DatabaseError> {
        Ok(Self {
            received_at: parse_timestamp("received_at", &row.received_at)?,
            processed_at: parse_timestamp("processed_at", &row.processed_at)?,
            attachment_paths: serde_json::from_str(&row.attachment_paths)?,
            message_id: row.message_id,
            subject: row.subject,
            sender: row.sender,
            recipient: row.recipient,
            folder: row.folder,
        })
    }
}

fn parse_timestamp(column: &'static str, value: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(value)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Corrupt {
            column,
            reason: format!("'{}': {}", value, e),
        })
}

/// Durable record of which messages have been processed.
#[derive(Clone)]
pub struct MetadataStore {
    db: Database,
}

impl MetadataStore {
    /// Opens (or creates) the store at `path`.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        Ok(Self::new(Database::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn has_processed(&self, message_id: &str) -> Result<bool, DatabaseError> {
        record_repo::exists(&self.db, message_id)
    }

    /// Stores `record` unless its message id is already known.
    ///
    /// Returns `true` if a new record was written.
    pub fn record(&self, record: &ProcessedRecord) -> Result<bool, DatabaseError> {
        let inserted = record_repo::insert(&self.db, &record.to_row()?)?;
        if inserted {
            debug!(
                "Recorded message {} with {} file(s)",
                record.message_id,
                record.attachment_paths.len()
            );
        } else {
            debug!("Message {} was already recorded", record.message_id);
        }
        Ok(inserted)
    }

    pub fn find(&self, message_id: &str) -> Result<Option<ProcessedRecord>, DatabaseError> {
        record_repo::find(&self.db, message_id)?
            .map(ProcessedRecord::from_row)
            .transpose()
    }

    pub fn count(&self) -> Result<u64, DatabaseError> {
        record_repo::count(&self.db)
    }

    /// The `limit` most recently processed records, newest first.
    pub fn recent(&self, limit: u32) -> Result<Vec<ProcessedRecord>, DatabaseError> {
        record_repo::find_recent(&self.db, limit)?
            .into_iter()
            .map(ProcessedRecord::from_row)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(message_id: &str) -> ProcessedRecord {
        ProcessedRecord {
            message_id: message_id.to_string(),
            subject: "Invoice".to_string(),
            sender: "billing@example.com".to_string(),
            recipient: Some("ap@example.com".to_string()),
            received_at: Utc.with_ymd_and_hms(2024, 3, 5, 10, 15, 0).unwrap(),
            processed_at: Utc.with_ymd_and_hms(2024, 3, 5, 11, 0, 0).unwrap(),
            attachment_paths: vec!["out/a.pdf".to_string()],
            folder: Some("INBOX".to_string()),
        }
    }

    #[test]
    fn test_record_and_find() {
        let store = MetadataStore::open_in_memory().unwrap();
        assert!(!store.has_processed("m1").unwrap());

        assert!(store.record(&record("m1")).unwrap());

        assert!(store.has_processed("m1").unwrap());
        assert_eq!(store.find("m1").unwrap(), Some(record("m1")));
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_record_is_idempotent() {
        let store = MetadataStore::open_in_memory().unwrap();
        assert!(store.record(&record("m1")).unwrap());

        let mut again = record("m1");
        again.attachment_paths = vec!["out/other.pdf".to_string()];
        assert!(!store.record(&again).unwrap());

        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(
            store.find("m1").unwrap().unwrap().attachment_paths,
            vec!["out/a.pdf"]
        );
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("processed_emails.db");

        {
            let store = MetadataStore::open(&path).unwrap();
            store.record(&record("m1")).unwrap();
        }

        let store = MetadataStore::open(&path).unwrap();
        assert!(store.has_processed("m1").unwrap());
        assert_eq!(store.find("m1").unwrap(), Some(record("m1")));
    }

    #[test]
    fn test_recent() {
        let store = MetadataStore::open_in_memory().unwrap();
        let mut older = record("m1");
        older.processed_at = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        store.record(&older).unwrap();
        store.record(&record("m2")).unwrap();

        let recent = store.recent(10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].message_id, "m2");
    }

    #[test]
    fn test_from_message_without_folder() {
        let message = Message {
            id: "m1".to_string(),
            subject: "Hi".to_string(),
            sender: "a@example.com".to_string(),
            recipient: None,
            received_at: Utc.with_ymd_and_hms(2024, 3, 5, 10, 15, 0).unwrap(),
            is_read: false,
            folder: String::new(),
            attachments: Vec::new(),
        };
        let record = ProcessedRecord::from_message(&message, Vec::new(), Utc::now());
        assert_eq!(record.folder, None);
        assert_eq!(record.recipient, None);
        assert!(record.attachment_paths.is_empty());
    }

    #[test]
    fn test_recipient_round_trips() {
        let store = MetadataStore::open_in_memory().unwrap();
        let message = Message {
            id: "m1".to_string(),
            subject: "Invoice".to_string(),
            sender: "billing@example.com".to_string(),
            recipient: Some("ap@example.com".to_string()),
            received_at: Utc.with_ymd_and_hms(2024, 3, 5, 10, 15, 0).unwrap(),
            is_read: false,
            folder: "INBOX".to_string(),
            attachments: Vec::new(),
        };
        store
            .record(&ProcessedRecord::from_message(&message, Vec::new(), Utc::now()))
            .unwrap();

        let stored = store.find("m1").unwrap().unwrap();
        assert_eq!(stored.recipient.as_deref(), Some("ap@example.com"));
    }
}
