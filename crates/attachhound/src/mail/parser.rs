//! RFC 822 message parsing and attachment extraction.

use chrono::{DateTime, Utc};
use log::{debug, warn};
use mail_parser::{MessageParser, MimeHeaders, PartType};

use super::error::{MailboxError, Result};
use super::{Attachment, Message};

/// What the server told us about a message besides its raw bytes.
#[derive(Debug, Clone)]
pub struct FetchedEnvelope {
    pub id: String,
    pub folder: String,
    pub is_read: bool,
    /// Server-side receipt time (IMAP INTERNALDATE), if provided.
    pub received_at: Option<DateTime<Utc>>,
}

/// Parses a raw message into a [`Message`].
///
/// The receipt time comes from the server when available, then from the
/// `Date` header, then falls back to the current time.
pub fn parse_message(raw: &[u8], envelope: FetchedEnvelope) -> Result<Message> {
    let parsed = MessageParser::default()
        .parse(raw)
        .ok_or_else(|| MailboxError::ParseError(format!("message {}", envelope.id)))?;

    let subject = parsed.subject().unwrap_or_default().to_string();
    let sender = parsed
        .from()
        .and_then(|addr| addr.first().map(format_address))
        .unwrap_or_default();
    let recipient = parsed.to().and_then(|addr| addr.first().map(format_address));

    let received_at = envelope
        .received_at
        .or_else(|| {
            parsed
                .date()
                .and_then(|d| DateTime::<Utc>::from_timestamp(d.to_timestamp(), 0))
        })
        .unwrap_or_else(|| {
            warn!(
                "Message {} has no usable date, using current time",
                envelope.id
            );
            Utc::now()
        });

    let mut attachments = Vec::new();
    for part in parsed.parts.iter() {
        if !is_attachment(part) {
            continue;
        }

        let content = match &part.body {
            PartType::Binary(data) | PartType::InlineBinary(data) => data.to_vec(),
            PartType::Text(text) => text.as_bytes().to_vec(),
            PartType::Html(html) => html.as_bytes().to_vec(),
            _ => continue,
        };

        let mime_type = part
            .content_type()
            .map(|ct| match ct.subtype() {
                Some(subtype) => format!("{}/{}", ct.ctype(), subtype),
                None => ct.ctype().to_string(),
            })
            .unwrap_or_else(|| "application/octet-stream".to_string());

        let filename = attachment_filename(part, &mime_type);
        debug!(
            "Found attachment '{}' ({}, {} bytes) in message {}",
            filename,
            mime_type,
            content.len(),
            envelope.id
        );

        attachments.push(Attachment {
            filename,
            mime_type,
            content,
        });
    }

    Ok(Message {
        id: envelope.id,
        subject,
        sender,
        recipient,
        received_at,
        is_read: envelope.is_read,
        folder: envelope.folder,
        attachments,
    })
}

/// A part counts as an attachment when it is marked as one or carries a filename.
fn is_attachment(part: &mail_parser::MessagePart) -> bool {
    if let Some(disposition) = part.content_disposition() {
        if disposition.ctype().eq_ignore_ascii_case("attachment") {
            return true;
        }
    }
    part.attachment_name().is_some()
}

/// Filename from Content-Disposition or Content-Type `name`, else derived from the MIME type.
fn attachment_filename(part: &mail_parser::MessagePart, mime_type: &str) -> String {
    let raw = part
        .attachment_name()
        .or_else(|| part.content_type().and_then(|ct| ct.attribute("name")))
        .map(|s| s.to_string());

    match raw {
        Some(name) if !name.trim().is_empty() => name,
        _ => format!("attachment.{}", mime_to_extension(mime_type)),
    }
}

/// Formats an address as "Name <email>" or just the email.
fn format_address(addr: &mail_parser::Addr) -> String {
    match addr.name() {
        Some(name) => format!("{} <{}>", name, addr.address().unwrap_or_default()),
        None => addr.address().unwrap_or_default().to_string(),
    }
}

fn mime_to_extension(mime_type: &str) -> &'static str {
    match mime_type.to_lowercase().as_str() {
        "application/pdf" => "pdf",
        "application/msword" => "doc",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => "docx",
        "application/vnd.ms-excel" => "xls",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => "xlsx",
        "application/zip" => "zip",
        "application/json" => "json",
        "application/xml" | "text/xml" => "xml",
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/tiff" => "tiff",
        "text/plain" => "txt",
        "text/html" => "html",
        "text/csv" => "csv",
        "message/rfc822" => "eml",
        _ => "bin",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const MULTIPART: &str = "From: Alice Example <alice@example.com>\r\n\
To: bob@example.com\r\n\
Subject: Invoice March\r\n\
Date: Tue, 05 Mar 2024 10:15:00 +0000\r\n\
Message-ID: <abc@example.com>\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"XYZ\"\r\n\
\r\n\
--XYZ\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
Please find the invoice attached.\r\n\
--XYZ\r\n\
Content-Type: application/pdf; name=\"invoice.pdf\"\r\n\
Content-Disposition: attachment; filename=\"invoice.pdf\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
JVBERi0xLjQK\r\n\
--XYZ\r\n\
Content-Type: text/csv\r\n\
Content-Disposition: attachment; filename=\"../../lines.csv\"\r\n\
\r\n\
a,b\r\n\
--XYZ--\r\n";

    fn envelope(received_at: Option<DateTime<Utc>>) -> FetchedEnvelope {
        FetchedEnvelope {
            id: "INBOX:1:7".to_string(),
            folder: "INBOX".to_string(),
            is_read: false,
            received_at,
        }
    }

    #[test]
    fn test_parse_headers_and_attachments() {
        let message = parse_message(MULTIPART.as_bytes(), envelope(None)).unwrap();

        assert_eq!(message.id, "INBOX:1:7");
        assert_eq!(message.subject, "Invoice March");
        assert_eq!(message.sender, "Alice Example <alice@example.com>");
        assert_eq!(message.recipient.as_deref(), Some("bob@example.com"));
        assert_eq!(
            message.received_at,
            Utc.with_ymd_and_hms(2024, 3, 5, 10, 15, 0).unwrap()
        );
        assert_eq!(message.attachments.len(), 2);
        assert_eq!(message.attachments[0].filename, "invoice.pdf");
        assert_eq!(message.attachments[0].mime_type, "application/pdf");
        assert_eq!(message.attachments[0].content, b"%PDF-1.4\n");
    }

    #[test]
    fn test_filenames_are_left_raw() {
        let message = parse_message(MULTIPART.as_bytes(), envelope(None)).unwrap();
        assert_eq!(message.attachments[1].filename, "../../lines.csv");
    }

    #[test]
    fn test_server_date_takes_priority() {
        let internal = Utc.with_ymd_and_hms(2024, 3, 6, 8, 0, 0).unwrap();
        let message = parse_message(MULTIPART.as_bytes(), envelope(Some(internal))).unwrap();
        assert_eq!(message.received_at, internal);
    }

    #[test]
    fn test_plain_message_has_no_attachments() {
        let raw = "From: a@example.com\r\nSubject: hi\r\n\r\nhello\r\n";
        let message = parse_message(raw.as_bytes(), envelope(None)).unwrap();
        assert!(message.attachments.is_empty());
        assert_eq!(message.sender, "a@example.com");
    }

    #[test]
    fn test_mime_to_extension() {
        assert_eq!(mime_to_extension("application/pdf"), "pdf");
        assert_eq!(mime_to_extension("IMAGE/JPEG"), "jpg");
        assert_eq!(mime_to_extension("unknown/type"), "bin");
    }
}
