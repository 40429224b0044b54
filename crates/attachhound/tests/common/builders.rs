//! Builder patterns for creating test messages.

#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};

use attachhound::{Attachment, Message};

/// Builder for creating `Message` instances.
pub struct MessageBuilder {
    message: Message,
}

impl MessageBuilder {
    /// A message received now, unread, without attachments.
    pub fn new(id: &str) -> Self {
        Self {
            message: Message {
                id: id.to_string(),
                subject: "Test message".to_string(),
                sender: "sender@example.com".to_string(),
                recipient: Some("me@example.com".to_string()),
                received_at: Utc::now(),
                is_read: false,
                folder: "inbox".to_string(),
                attachments: Vec::new(),
            },
        }
    }

    pub fn subject(mut self, subject: &str) -> Self {
        self.message.subject = subject.to_string();
        self
    }

    pub fn sender(mut self, sender: &str) -> Self {
        self.message.sender = sender.to_string();
        self
    }

    pub fn received_at(mut self, received_at: DateTime<Utc>) -> Self {
        self.message.received_at = received_at;
        self
    }

    pub fn received_days_ago(self, days: i64) -> Self {
        self.received_at(Utc::now() - Duration::days(days))
    }

    pub fn read(mut self, is_read: bool) -> Self {
        self.message.is_read = is_read;
        self
    }

    pub fn attachment(mut self, filename: &str, content: &[u8]) -> Self {
        self.message
            .attachments
            .push(Attachment::new(filename, content.to_vec()));
        self
    }

    /// Adds an attachment of `size` bytes.
    pub fn attachment_of_size(self, filename: &str, size: usize) -> Self {
        self.attachment(filename, &vec![0x42u8; size])
    }

    pub fn build(self) -> Message {
        self.message
    }
}

/// The message from the basic scenario: one 100-byte `a.pdf`.
pub fn invoice_message(id: &str) -> Message {
    MessageBuilder::new(id)
        .subject("Invoice")
        .attachment_of_size("a.pdf", 100)
        .build()
}
