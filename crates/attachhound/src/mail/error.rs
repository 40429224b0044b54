//! Mailbox transport error types.

use thiserror::Error;

/// Errors raised by a mailbox adapter.
///
/// Failures while connecting or listing abort the current poll cycle;
/// failures for a single message only skip that message.
#[derive(Error, Debug)]
pub enum MailboxError {
    /// Failed to reach the mail server.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// TLS/SSL error during connection.
    #[error("TLS error: {0}")]
    TlsError(String),

    /// The server rejected the credentials.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// IMAP protocol error.
    #[error("IMAP protocol error: {0}")]
    ProtocolError(String),

    /// An operation was attempted before `connect`.
    #[error("Not connected to the mail server")]
    NotConnected,

    /// Folder not found on the server.
    #[error("Folder '{0}' not found")]
    FolderNotFound(String),

    /// A message identifier that this adapter did not produce.
    #[error("Invalid message identifier '{0}'")]
    InvalidMessageId(String),

    /// Failed to parse a message or a server response.
    #[error("Failed to parse: {0}")]
    ParseError(String),

    /// HTTP transport error (Exchange).
    #[error("HTTP error: {0}")]
    Http(String),

    /// Exchange Web Services returned an error response.
    #[error("EWS error {code}: {message}")]
    Ews { code: String, message: String },

    /// Invalid adapter configuration.
    #[error("Invalid configuration: {0}")]
    ConfigError(String),
}

impl From<async_native_tls::Error> for MailboxError {
    fn from(err: async_native_tls::Error) -> Self {
        MailboxError::TlsError(err.to_string())
    }
}

impl From<reqwest::Error> for MailboxError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            MailboxError::ConnectionFailed(err.to_string())
        } else {
            MailboxError::Http(err.to_string())
        }
    }
}

impl From<quick_xml::Error> for MailboxError {
    fn from(err: quick_xml::Error) -> Self {
        MailboxError::ParseError(err.to_string())
    }
}

/// Result type for mailbox operations.
pub type Result<T> = std::result::Result<T, MailboxError>;
