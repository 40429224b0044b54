pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod filter;
pub mod mail;
pub mod scheduler;
pub mod secrets;
pub mod store;

pub use config::{load_config, Config, ConfigOverrides, LogFormat, MailboxConfig, MailboxKind};
pub use error::{AttachhoundError, ConfigError, Result};
pub use export::{ExportOutcome, Exporter, ExporterKind};
pub use filter::FilterSpec;
pub use mail::{build_mailbox, Attachment, Mailbox, MailboxError, Message, MessageSummary};
pub use scheduler::{CycleReport, PollSettings, Poller, PollerState};
pub use store::{MetadataStore, ProcessedRecord};
