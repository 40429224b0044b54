//! Periodic mailbox polling.
//!
//! A [`Poller`] owns the mailbox connection, the metadata store and the
//! exporter and runs one cycle at a time: connect, list, then for every new
//! message fetch, filter, export, record and optionally mark read or delete.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::Config;
use crate::error::AttachhoundError;
use crate::export::Exporter;
use crate::filter::FilterSpec;
use crate::mail::{Mailbox, MailboxError};
use crate::store::{MetadataStore, ProcessedRecord};

/// Longest stretch the poller sleeps without looking at the shutdown flag.
const SHUTDOWN_CHECK: Duration = Duration::from_secs(1);

/// What the poller does with the mailbox on each cycle.
#[derive(Debug, Clone)]
pub struct PollSettings {
    pub folder: String,
    pub public_folder: bool,
    /// Remove messages from the server once fully exported.
    pub delete: bool,
    /// Flag messages as read once fully exported.
    pub mark_read: bool,
    pub filters: FilterSpec,
    /// Pause between the end of one cycle and the start of the next.
    pub interval: Duration,
}

impl PollSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            folder: config.mailbox.folder.clone(),
            public_folder: config.mailbox.public_folder,
            delete: config.mailbox.delete,
            mark_read: config.mailbox.mark_read,
            filters: config.mailbox.filters.clone(),
            interval: Duration::from_secs(config.interval),
        }
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            folder: "inbox".to_string(),
            public_folder: false,
            delete: false,
            mark_read: false,
            filters: FilterSpec::default(),
            interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    /// Waiting for the next cycle.
    Idle,
    /// A cycle is in progress.
    Polling,
}

/// Counters for one poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Messages listed in the folder.
    pub listed: usize,
    pub already_processed: usize,
    pub filtered_out: usize,
    /// Attachment files written.
    pub exported: usize,
    /// New records in the store.
    pub recorded: usize,
    pub marked_read: usize,
    pub deleted: usize,
    /// Messages whose processing failed.
    pub failed: usize,
    /// The cycle ended early on a connection or listing error.
    pub aborted: bool,
}

/// Drives poll cycles against one mailbox.
pub struct Poller {
    mailbox: Box<dyn Mailbox>,
    store: MetadataStore,
    exporter: Exporter,
    settings: PollSettings,
    state: PollerState,
    last_run: Option<DateTime<Utc>>,
    shutdown: Arc<AtomicBool>,
}

impl Poller {
    pub fn new(
        mailbox: Box<dyn Mailbox>,
        store: MetadataStore,
        exporter: Exporter,
        settings: PollSettings,
    ) -> Self {
        Self {
            mailbox,
            store,
            exporter,
            settings,
            state: PollerState::Idle,
            last_run: None,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn state(&self) -> PollerState {
        self.state
    }

    /// When the last cycle finished.
    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        self.last_run
    }

    pub fn settings(&self) -> &PollSettings {
        &self.settings
    }

    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    /// Flag that stops [`run`](Poller::run) once set. Checked between cycles
    /// and while sleeping; a running cycle always completes.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Signals the poller to stop.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Polls until shutdown is requested, sleeping `interval` between cycles.
    pub async fn run(&mut self) {
        info!(
            folder = %self.settings.folder,
            interval_secs = self.settings.interval.as_secs(),
            "Poller started"
        );

        while !self.is_shutdown() {
            self.run_cycle().await;
            if self.is_shutdown() {
                break;
            }
            self.sleep_interval().await;
        }

        info!("Poller stopped");
    }

    /// Runs a single cycle. Never fails: errors are logged and counted.
    pub async fn run_cycle(&mut self) -> CycleReport {
        self.state = PollerState::Polling;

        let span = info_span!(
            "poll_cycle",
            mailbox = %self.mailbox.kind(),
            folder = %self.settings.folder
        );
        let report = self.cycle().instrument(span).await;

        self.last_run = Some(Utc::now());
        self.state = PollerState::Idle;
        report
    }

    async fn cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::default();

        if let Err(e) = self.poll_messages(&mut report).await {
            error!(error = %e, "Poll cycle aborted, retrying after the interval");
            report.aborted = true;
        }

        // Always attempted, even after a failed connect
        if let Err(e) = self.mailbox.disconnect().await {
            warn!(error = %e, "Failed to disconnect from mailbox");
        }

        info!(
            listed = report.listed,
            already_processed = report.already_processed,
            filtered_out = report.filtered_out,
            exported = report.exported,
            recorded = report.recorded,
            deleted = report.deleted,
            failed = report.failed,
            "Poll cycle finished"
        );
        report
    }

    async fn poll_messages(&mut self, report: &mut CycleReport) -> Result<(), MailboxError> {
        self.mailbox.connect().await?;

        let ids = self
            .mailbox
            .list_message_ids(&self.settings.folder, self.settings.public_folder)
            .await?;
        report.listed = ids.len();

        for id in ids {
            let span = info_span!("message", message_id = %id);
            if let Err(e) = self.process_message(&id, report).instrument(span).await {
                report.failed += 1;
                error!(message_id = %id, error = %e, "Failed to process message");
            }
        }
        Ok(())
    }

    async fn process_message(
        &mut self,
        id: &str,
        report: &mut CycleReport,
    ) -> Result<(), AttachhoundError> {
        if self.store.has_processed(id)? {
            debug!("Already processed");
            report.already_processed += 1;
            return Ok(());
        }

        // Filters are decided on flags and arrival time first, so excluded
        // messages are never downloaded
        if !self.settings.filters.is_empty() {
            let Some(summary) = self.mailbox.fetch_summary(id).await? else {
                debug!("Message disappeared before it could be fetched");
                return Ok(());
            };
            if !self.settings.filters.may_qualify(&summary, Utc::now())? {
                debug!("Message does not match filters");
                report.filtered_out += 1;
                return Ok(());
            }
        }

        let Some(message) = self.mailbox.fetch_message(id).await? else {
            debug!("Message disappeared before it could be fetched");
            return Ok(());
        };

        if !self.settings.filters.qualifies(&message, Utc::now())? {
            debug!(subject = %message.subject, "Message does not match filters");
            report.filtered_out += 1;
            return Ok(());
        }

        let outcome = self.exporter.export(&message)?;
        report.exported += outcome.written.len();

        if !outcome.should_record() {
            // Nothing written: leave unrecorded so the next cycle retries
            return match outcome.failures.into_iter().next() {
                Some(failure) => Err(failure.error.into()),
                None => Ok(()),
            };
        }

        let record = ProcessedRecord::from_message(&message, outcome.written_paths(), Utc::now());
        if self.store.record(&record)? {
            report.recorded += 1;
        }
        info!(
            subject = %message.subject,
            files = outcome.written.len(),
            "Message processed"
        );

        if !outcome.is_complete() {
            warn!(
                failed_attachments = outcome.failures.len(),
                "Export incomplete, leaving message on the server untouched"
            );
            return Ok(());
        }

        if self.settings.mark_read && !message.is_read {
            self.mailbox.mark_read(id).await?;
            report.marked_read += 1;
        }

        if self.settings.delete {
            self.mailbox.delete_message(id).await?;
            report.deleted += 1;
            info!("Deleted message from server");
        }

        Ok(())
    }

    async fn sleep_interval(&self) {
        // None when the interval runs past what the clock can represent;
        // then only shutdown ends the wait.
        let deadline = Instant::now().checked_add(self.settings.interval);
        debug!(
            interval_secs = self.settings.interval.as_secs(),
            "Waiting for next poll cycle"
        );

        while !self.is_shutdown() {
            let slice = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    (deadline - now).min(SHUTDOWN_CHECK)
                }
                None => SHUTDOWN_CHECK,
            };
            tokio::time::sleep(slice).await;
        }
    }
}
