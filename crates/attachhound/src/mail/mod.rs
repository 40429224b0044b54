//! Mailbox access.
//!
//! IMAP and Exchange Web Services sit behind the [`Mailbox`] trait so the
//! poll loop never needs to know which kind of server it is talking to.

pub mod error;
pub mod exchange;
pub mod imap;
pub mod parser;
mod xml;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;

use crate::config::{MailboxConfig, MailboxKind};

pub use error::{MailboxError, Result};
pub use exchange::ExchangeMailbox;
pub use imap::ImapMailbox;
pub use parser::{parse_message, FetchedEnvelope};

/// A file attached to a message, as delivered by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Filename as sent by the server (not yet sanitized).
    pub filename: String,
    /// MIME type, `application/octet-stream` when unknown.
    pub mime_type: String,
    /// Decoded payload.
    pub content: Vec<u8>,
}

impl Attachment {
    pub fn new(filename: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            mime_type: "application/octet-stream".to_string(),
            content,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    /// Payload size in bytes.
    pub fn size(&self) -> usize {
        self.content.len()
    }
}

/// A message fetched from the server. Transient: only the
/// [`ProcessedRecord`](crate::store::ProcessedRecord) derived from it is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Server-assigned identifier, stable across polls.
    pub id: String,
    pub subject: String,
    pub sender: String,
    pub recipient: Option<String>,
    pub received_at: DateTime<Utc>,
    pub is_read: bool,
    /// Folder the message was listed from.
    pub folder: String,
    pub attachments: Vec<Attachment>,
}

/// Read state and arrival time of a message, fetched without its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSummary {
    pub id: String,
    /// `None` when the server did not report an arrival time.
    pub received_at: Option<DateTime<Utc>>,
    pub is_read: bool,
}

impl From<&Message> for MessageSummary {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id.clone(),
            received_at: Some(message.received_at),
            is_read: message.is_read,
        }
    }
}

/// Uniform interface over the supported mailbox protocols.
///
/// Identifiers returned by [`list_message_ids`](Mailbox::list_message_ids)
/// are only meaningful to the adapter that produced them.
#[async_trait]
pub trait Mailbox: Send {
    /// Which protocol this adapter speaks.
    fn kind(&self) -> MailboxKind;

    /// Opens the connection and authenticates. Idempotent.
    async fn connect(&mut self) -> Result<()>;

    /// Lists the identifiers of all messages in `folder`.
    ///
    /// `public` selects the public folder tree where the protocol has one.
    async fn list_message_ids(&mut self, folder: &str, public: bool) -> Result<Vec<String>>;

    /// Fetches the flags and arrival time of a message, without downloading
    /// its content.
    ///
    /// Returns `Ok(None)` when the message vanished since it was listed.
    async fn fetch_summary(&mut self, id: &str) -> Result<Option<MessageSummary>>;

    /// Fetches a message with its attachments.
    ///
    /// Returns `Ok(None)` when the message vanished since it was listed.
    /// Fetching never changes the read state on the server.
    async fn fetch_message(&mut self, id: &str) -> Result<Option<Message>>;

    /// Flags a message as read.
    async fn mark_read(&mut self, id: &str) -> Result<()>;

    /// Removes a message from the server.
    async fn delete_message(&mut self, id: &str) -> Result<()>;

    /// Closes the connection. Safe to call when not connected.
    async fn disconnect(&mut self) -> Result<()>;
}

/// Builds the adapter selected by `config.kind`.
pub fn build_mailbox(config: &MailboxConfig, password: SecretString) -> Result<Box<dyn Mailbox>> {
    let server = config.effective_server().ok_or_else(|| {
        MailboxError::ConfigError(format!("No server configured for {} mailbox", config.kind))
    })?;

    let mailbox: Box<dyn Mailbox> = match config.kind {
        MailboxKind::Imap => Box::new(ImapMailbox::new(
            server,
            config.port,
            config.email.clone(),
            password,
        )),
        MailboxKind::Exchange => Box::new(ExchangeMailbox::new(
            &server,
            config.email.clone(),
            password,
        )?),
    };
    Ok(mailbox)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attachment_size() {
        let attachment = Attachment::new("a.pdf", vec![0u8; 100]);
        assert_eq!(attachment.size(), 100);
        assert_eq!(attachment.mime_type, "application/octet-stream");
    }

    #[test]
    fn test_summary_from_message() {
        let message = Message {
            id: "m1".to_string(),
            subject: "Invoice".to_string(),
            sender: "billing@example.com".to_string(),
            recipient: None,
            received_at: Utc::now(),
            is_read: true,
            folder: "INBOX".to_string(),
            attachments: vec![Attachment::new("a.pdf", vec![0u8; 10])],
        };
        let summary = MessageSummary::from(&message);
        assert_eq!(summary.id, "m1");
        assert_eq!(summary.received_at, Some(message.received_at));
        assert!(summary.is_read);
    }

    #[test]
    fn test_build_imap_mailbox() {
        let config = MailboxConfig {
            email: "user@example.com".to_string(),
            ..MailboxConfig::default()
        };
        let mailbox = build_mailbox(&config, SecretString::from("secret")).unwrap();
        assert_eq!(mailbox.kind(), MailboxKind::Imap);
    }

    #[test]
    fn test_build_exchange_requires_server() {
        let config = MailboxConfig {
            kind: MailboxKind::Exchange,
            email: "user@example.com".to_string(),
            ..MailboxConfig::default()
        };
        let result = build_mailbox(&config, SecretString::from("secret"));
        assert!(matches!(result, Err(MailboxError::ConfigError(_))));
    }

    #[test]
    fn test_build_exchange_mailbox() {
        let config = MailboxConfig {
            kind: MailboxKind::Exchange,
            server: Some("mail.example.com".to_string()),
            email: "user@example.com".to_string(),
            ..MailboxConfig::default()
        };
        let mailbox = build_mailbox(&config, SecretString::from("secret")).unwrap();
        assert_eq!(mailbox.kind(), MailboxKind::Exchange);
    }
}
