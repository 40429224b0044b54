//! IMAP mailbox adapter.

use async_imap::types::Flag;
use async_imap::Session;
use async_native_tls::TlsConnector;
use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;
use log::{debug, info, warn};
use secrecy::{ExposeSecret, SecretString};

use crate::config::MailboxKind;

use super::error::{MailboxError, Result};
use super::parser::{parse_message, FetchedEnvelope};
use super::{Mailbox, Message, MessageSummary};

/// Type alias for the underlying async stream (using async-std compatible TcpStream).
type AsyncTcpStream = async_io::Async<std::net::TcpStream>;

/// Type alias for the TLS stream used by the IMAP session.
type TlsStream = async_native_tls::TlsStream<AsyncTcpStream>;

/// Builds the identifier for a message: `<folder>:<uidvalidity>:<uid>`.
///
/// UIDs are only unique within one UIDVALIDITY of one folder, so all three
/// parts are needed for the identifier to stay stable across polls.
pub fn make_message_id(folder: &str, uidvalidity: u32, uid: u32) -> String {
    format!("{}:{}:{}", folder, uidvalidity, uid)
}

/// Splits an identifier built by [`make_message_id`]. Folder names may contain `:`.
pub fn split_message_id(id: &str) -> Option<(&str, u32, u32)> {
    let mut parts = id.rsplitn(3, ':');
    let uid = parts.next()?.parse().ok()?;
    let uidvalidity = parts.next()?.parse().ok()?;
    let folder = parts.next()?;
    Some((folder, uidvalidity, uid))
}

/// How a message flagged `\Deleted` is removed from the selected folder.
#[derive(Debug, PartialEq, Eq)]
enum Expunge {
    /// `UID EXPUNGE` (RFC 4315): removes only the given message.
    Uid(String),
    /// Plain `EXPUNGE`: removes every message flagged `\Deleted` in the folder.
    Folder,
}

impl Expunge {
    fn for_uid(uid: u32, uidplus: bool) -> Self {
        if uidplus {
            Expunge::Uid(uid.to_string())
        } else {
            Expunge::Folder
        }
    }
}

/// IMAP over implicit TLS with password login.
pub struct ImapMailbox {
    server: String,
    port: u16,
    username: String,
    password: SecretString,
    session: Option<Session<TlsStream>>,
    current_folder: Option<String>,
    current_uidvalidity: Option<u32>,
    /// Server advertised UIDPLUS at login.
    uidplus: bool,
}

impl ImapMailbox {
    pub fn new(server: String, port: u16, username: String, password: SecretString) -> Self {
        Self {
            server,
            port,
            username,
            password,
            session: None,
            current_folder: None,
            current_uidvalidity: None,
            uidplus: false,
        }
    }

    /// Checks if the client is currently connected.
    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    fn session(&mut self) -> Result<&mut Session<TlsStream>> {
        self.session.as_mut().ok_or(MailboxError::NotConnected)
    }

    /// Opens a folder read-write (flags may be changed later) and returns its UIDVALIDITY.
    async fn select_folder(&mut self, folder: &str) -> Result<u32> {
        let session = self.session()?;

        info!("Selecting folder: {}", folder);
        let mailbox = session.select(folder).await.map_err(|e| {
            let text = e.to_string();
            if text.contains("doesn't exist") || text.contains("NO") {
                MailboxError::FolderNotFound(folder.to_string())
            } else {
                MailboxError::ProtocolError(text)
            }
        })?;

        let uidvalidity = mailbox.uid_validity.ok_or_else(|| {
            MailboxError::ProtocolError("Server did not provide UIDVALIDITY".to_string())
        })?;

        self.current_folder = Some(folder.to_string());
        self.current_uidvalidity = Some(uidvalidity);
        debug!("Folder '{}' opened with UIDVALIDITY={}", folder, uidvalidity);
        Ok(uidvalidity)
    }

    /// Resolves an identifier to a UID in the selected folder.
    ///
    /// Returns `None` when the folder's UIDVALIDITY changed since the id was issued.
    async fn resolve_uid(&mut self, id: &str) -> Result<Option<u32>> {
        let (folder, uidvalidity, uid) =
            split_message_id(id).ok_or_else(|| MailboxError::InvalidMessageId(id.to_string()))?;

        let current = if self.current_folder.as_deref() == Some(folder) {
            match self.current_uidvalidity {
                Some(v) => v,
                None => self.select_folder(folder).await?,
            }
        } else {
            self.select_folder(folder).await?
        };

        if current != uidvalidity {
            warn!(
                "UIDVALIDITY of '{}' changed ({} -> {}), message {} is stale",
                folder, uidvalidity, current, id
            );
            return Ok(None);
        }
        Ok(Some(uid))
    }

    async fn add_flags(&mut self, uid: u32, flags: &str) -> Result<()> {
        let session = self.session()?;
        let responses: Vec<_> = session
            .uid_store(uid.to_string(), format!("+FLAGS ({})", flags))
            .await
            .map_err(|e| MailboxError::ProtocolError(e.to_string()))?
            .collect()
            .await;

        for response in responses {
            response.map_err(|e| MailboxError::ProtocolError(e.to_string()))?;
        }
        Ok(())
    }
}

#[async_trait]
impl Mailbox for ImapMailbox {
    fn kind(&self) -> MailboxKind {
        MailboxKind::Imap
    }

    async fn connect(&mut self) -> Result<()> {
        if self.session.is_some() {
            debug!("Already connected to IMAP server");
            return Ok(());
        }

        let addr = format!("{}:{}", self.server, self.port);
        info!("Connecting to IMAP server at {}", addr);

        // Establish TCP connection using std::net and wrap with async-io
        let std_stream = std::net::TcpStream::connect(&addr)
            .map_err(|e| MailboxError::ConnectionFailed(e.to_string()))?;
        std_stream
            .set_nonblocking(true)
            .map_err(|e| MailboxError::ConnectionFailed(e.to_string()))?;
        let tcp_stream = async_io::Async::new(std_stream)
            .map_err(|e| MailboxError::ConnectionFailed(e.to_string()))?;

        let tls_stream = TlsConnector::new()
            .connect(&self.server, tcp_stream)
            .await
            .map_err(|e| MailboxError::TlsError(e.to_string()))?;

        let client = async_imap::Client::new(tls_stream);
        let mut session = client
            .login(&self.username, self.password.expose_secret())
            .await
            .map_err(|(e, _)| MailboxError::AuthenticationFailed(e.to_string()))?;

        info!("Authenticated to {} as {}", self.server, self.username);
        self.uidplus = match session.capabilities().await {
            Ok(caps) => caps.has_str("UIDPLUS"),
            Err(e) => {
                warn!("Failed to query capabilities, assuming no UIDPLUS: {}", e);
                false
            }
        };
        debug!("UIDPLUS supported: {}", self.uidplus);
        self.session = Some(session);
        Ok(())
    }

    async fn list_message_ids(&mut self, folder: &str, public: bool) -> Result<Vec<String>> {
        if public {
            warn!(
                "Public folders are an Exchange feature; using IMAP folder '{}' as given",
                folder
            );
        }

        let uidvalidity = self.select_folder(folder).await?;
        let session = self.session()?;
        let uids = session
            .uid_search("ALL")
            .await
            .map_err(|e| MailboxError::ProtocolError(e.to_string()))?;

        let mut uids: Vec<u32> = uids.into_iter().collect();
        uids.sort_unstable();
        info!("Found {} messages in '{}'", uids.len(), folder);

        Ok(uids
            .into_iter()
            .map(|uid| make_message_id(folder, uidvalidity, uid))
            .collect())
    }

    async fn fetch_summary(&mut self, id: &str) -> Result<Option<MessageSummary>> {
        let Some(uid) = self.resolve_uid(id).await? else {
            return Ok(None);
        };
        let session = self.session()?;

        let fetches: Vec<_> = session
            .uid_fetch(uid.to_string(), "(UID FLAGS INTERNALDATE)")
            .await
            .map_err(|e| MailboxError::ProtocolError(e.to_string()))?
            .collect()
            .await;

        for fetch in fetches {
            let fetch = fetch.map_err(|e| MailboxError::ProtocolError(e.to_string()))?;
            if fetch.uid != Some(uid) {
                continue;
            }
            return Ok(Some(MessageSummary {
                id: id.to_string(),
                received_at: fetch.internal_date().map(|d| d.with_timezone(&Utc)),
                is_read: fetch.flags().any(|f| matches!(f, Flag::Seen)),
            }));
        }

        Ok(None)
    }

    async fn fetch_message(&mut self, id: &str) -> Result<Option<Message>> {
        let Some(uid) = self.resolve_uid(id).await? else {
            return Ok(None);
        };
        let folder = self.current_folder.clone().unwrap_or_default();
        let session = self.session()?;

        debug!("Fetching message UID {} from '{}'", uid, folder);

        // BODY.PEEK[] leaves \Seen untouched
        let fetches: Vec<_> = session
            .uid_fetch(uid.to_string(), "(UID FLAGS INTERNALDATE BODY.PEEK[])")
            .await
            .map_err(|e| MailboxError::ProtocolError(e.to_string()))?
            .collect()
            .await;

        for fetch in fetches {
            let fetch = fetch.map_err(|e| MailboxError::ProtocolError(e.to_string()))?;
            if fetch.uid != Some(uid) {
                continue;
            }
            let Some(body) = fetch.body() else {
                warn!("Message UID {} has no body", uid);
                continue;
            };

            let envelope = FetchedEnvelope {
                id: id.to_string(),
                folder: folder.clone(),
                is_read: fetch.flags().any(|f| matches!(f, Flag::Seen)),
                received_at: fetch.internal_date().map(|d| d.with_timezone(&Utc)),
            };
            return parse_message(body, envelope).map(Some);
        }

        warn!("Message UID {} not found in '{}'", uid, folder);
        Ok(None)
    }

    async fn mark_read(&mut self, id: &str) -> Result<()> {
        let Some(uid) = self.resolve_uid(id).await? else {
            return Ok(());
        };
        self.add_flags(uid, "\\Seen").await?;
        debug!("Marked UID {} as read", uid);
        Ok(())
    }

    async fn delete_message(&mut self, id: &str) -> Result<()> {
        let Some(uid) = self.resolve_uid(id).await? else {
            return Ok(());
        };
        self.add_flags(uid, "\\Deleted").await?;

        let expunge = Expunge::for_uid(uid, self.uidplus);
        let session = self.session()?;
        match expunge {
            Expunge::Uid(uid_set) => {
                let expunged: Vec<_> = session
                    .uid_expunge(uid_set)
                    .await
                    .map_err(|e| MailboxError::ProtocolError(e.to_string()))?
                    .collect()
                    .await;
                for removed in expunged {
                    removed.map_err(|e| MailboxError::ProtocolError(e.to_string()))?;
                }
            }
            Expunge::Folder => {
                debug!("Server lacks UIDPLUS, expunging the whole folder");
                let expunged: Vec<_> = session
                    .expunge()
                    .await
                    .map_err(|e| MailboxError::ProtocolError(e.to_string()))?
                    .collect()
                    .await;
                for seq in expunged {
                    seq.map_err(|e| MailboxError::ProtocolError(e.to_string()))?;
                }
            }
        }

        info!("Deleted message UID {}", uid);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(mut session) = self.session.take() {
            info!("Disconnecting from IMAP server");
            session
                .logout()
                .await
                .map_err(|e| MailboxError::ProtocolError(e.to_string()))?;
        }
        self.current_folder = None;
        self.current_uidvalidity = None;
        self.uidplus = false;
        Ok(())
    }
}

impl Drop for ImapMailbox {
    fn drop(&mut self) {
        if self.session.is_some() {
            warn!("ImapMailbox dropped without explicit disconnect - session will be closed");
        }
    }
}
