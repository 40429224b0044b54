//! Test harness for isolated poll cycles.
//!
//! `TestHarness` owns a temp directory with an attachment directory and a
//! SQLite file, and builds `Poller`s around a `FakeMailbox`.

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::time::Instant;

use attachhound::export::ExporterKind;
use attachhound::mail::Result as MailResult;
use attachhound::scheduler::{PollSettings, Poller};
use attachhound::{
    Exporter, Mailbox, MailboxError, MailboxKind, Message, MessageSummary, MetadataStore,
};

/// Observable state of a `FakeMailbox`.
#[derive(Default)]
pub struct FakeState {
    pub messages: Vec<Message>,
    /// Ids that are listed but can no longer be fetched.
    pub vanished_ids: Vec<String>,
    /// Time of every connect attempt.
    pub connects: Vec<Instant>,
    pub disconnects: usize,
    /// Ids whose summary was requested.
    pub summarized: Vec<String>,
    /// Ids whose full content was downloaded.
    pub fetched: Vec<String>,
    pub marked_read: Vec<String>,
    pub deleted: Vec<String>,
    pub fail_connect: bool,
    pub fail_list: bool,
    pub fail_fetch: HashSet<String>,
}

/// In-memory mailbox. Clones share state, so a test can keep one handle
/// while the poller owns another.
#[derive(Clone, Default)]
pub struct FakeMailbox {
    state: Arc<Mutex<FakeState>>,
}

impl FakeMailbox {
    pub fn new(messages: Vec<Message>) -> Self {
        let mailbox = Self::default();
        mailbox.state().messages = messages;
        mailbox
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }
}

#[async_trait]
impl Mailbox for FakeMailbox {
    fn kind(&self) -> MailboxKind {
        MailboxKind::Imap
    }

    async fn connect(&mut self) -> MailResult<()> {
        let mut state = self.state();
        state.connects.push(Instant::now());
        if state.fail_connect {
            return Err(MailboxError::AuthenticationFailed(
                "invalid credentials".to_string(),
            ));
        }
        Ok(())
    }

    async fn list_message_ids(&mut self, _folder: &str, _public: bool) -> MailResult<Vec<String>> {
        let state = self.state();
        if state.fail_list {
            return Err(MailboxError::ConnectionFailed(
                "connection reset by peer".to_string(),
            ));
        }
        Ok(state
            .messages
            .iter()
            .map(|m| m.id.clone())
            .chain(state.vanished_ids.iter().cloned())
            .collect())
    }

    async fn fetch_summary(&mut self, id: &str) -> MailResult<Option<MessageSummary>> {
        let mut state = self.state();
        state.summarized.push(id.to_string());
        if state.fail_fetch.contains(id) {
            return Err(MailboxError::ProtocolError(format!("fetch of {} failed", id)));
        }
        Ok(state
            .messages
            .iter()
            .find(|m| m.id == id)
            .map(MessageSummary::from))
    }

    async fn fetch_message(&mut self, id: &str) -> MailResult<Option<Message>> {
        let mut state = self.state();
        state.fetched.push(id.to_string());
        if state.fail_fetch.contains(id) {
            return Err(MailboxError::ProtocolError(format!("fetch of {} failed", id)));
        }
        Ok(state.messages.iter().find(|m| m.id == id).cloned())
    }

    async fn mark_read(&mut self, id: &str) -> MailResult<()> {
        let mut state = self.state();
        state.marked_read.push(id.to_string());
        if let Some(message) = state.messages.iter_mut().find(|m| m.id == id) {
            message.is_read = true;
        }
        Ok(())
    }

    async fn delete_message(&mut self, id: &str) -> MailResult<()> {
        let mut state = self.state();
        state.deleted.push(id.to_string());
        state.messages.retain(|m| m.id != id);
        Ok(())
    }

    async fn disconnect(&mut self) -> MailResult<()> {
        self.state().disconnects += 1;
        Ok(())
    }
}

/// Test harness providing an isolated attachment directory and store.
pub struct TestHarness {
    temp_dir: TempDir,
    pub attachment_dir: PathBuf,
    pub db_path: PathBuf,
    pub store: MetadataStore,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let attachment_dir = temp_dir.path().join("attachments");
        let db_path = temp_dir.path().join("db").join("processed_emails.db");
        let store = MetadataStore::open(&db_path).expect("Failed to open store");

        Self {
            temp_dir,
            attachment_dir,
            db_path,
            store,
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn poller(&self, mailbox: &FakeMailbox, settings: PollSettings) -> Poller {
        self.poller_with(mailbox, settings, ExporterKind::Simple)
    }

    pub fn poller_with(
        &self,
        mailbox: &FakeMailbox,
        settings: PollSettings,
        kind: ExporterKind,
    ) -> Poller {
        Poller::new(
            Box::new(mailbox.clone()),
            self.store.clone(),
            Exporter::new(kind, &self.attachment_dir),
            settings,
        )
    }

    /// Opens a second store on the same database file.
    pub fn reopen_store(&self) -> MetadataStore {
        MetadataStore::open(&self.db_path).expect("Failed to reopen store")
    }

    /// Names of the regular files directly in the attachment directory, sorted.
    pub fn exported_files(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.attachment_dir) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    /// Fills every name the exporter could pick for `filename`, so writing
    /// it fails with a name clash.
    pub fn exhaust_name(&self, base: &str, ext: &str) {
        std::fs::create_dir_all(&self.attachment_dir).unwrap();
        std::fs::write(self.attachment_dir.join(format!("{}.{}", base, ext)), b"").unwrap();
        for n in 2..=1000 {
            std::fs::write(
                self.attachment_dir.join(format!("{}_{}.{}", base, n, ext)),
                b"",
            )
            .unwrap();
        }
    }
}
