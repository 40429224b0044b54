use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::export::ExporterKind;
use crate::filter::FilterSpec;
use crate::secrets::{expand_home, has_secret_source, resolve_secret, SecretError, SecretSource};

/// IMAP server used when none is configured.
pub const DEFAULT_IMAP_SERVER: &str = "imap.gmail.com";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub mailbox: MailboxConfig,

    /// Layout of exported files.
    #[serde(default)]
    pub exporter: ExporterKind,

    /// Directory attachments are written to.
    #[serde(default = "default_attachment_dir")]
    pub attachment_dir: String,

    /// SQLite file holding processed message records.
    #[serde(default = "default_database")]
    pub database: String,

    /// Seconds between poll cycles.
    #[serde(default = "default_interval")]
    pub interval: u64,

    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_attachment_dir() -> String {
    ".attachhound/attachments".to_string()
}

fn default_database() -> String {
    ".attachhound/processed_emails.db".to_string()
}

fn default_interval() -> u64 {
    60
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mailbox: MailboxConfig::default(),
            exporter: ExporterKind::default(),
            attachment_dir: default_attachment_dir(),
            database: default_database(),
            interval: default_interval(),
            log_format: LogFormat::default(),
        }
    }
}

impl Config {
    /// Attachment directory with `~` expanded.
    pub fn attachment_dir_path(&self) -> PathBuf {
        expand_home(&self.attachment_dir)
    }

    /// Database path with `~` expanded.
    pub fn database_path(&self) -> PathBuf {
        expand_home(&self.database)
    }
}

/// Mailbox protocol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MailboxKind {
    #[default]
    #[serde(alias = "IMAP", alias = "Imap")]
    Imap,
    #[serde(alias = "Exchange", alias = "EXCHANGE")]
    Exchange,
}

impl fmt::Display for MailboxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MailboxKind::Imap => f.write_str("imap"),
            MailboxKind::Exchange => f.write_str("exchange"),
        }
    }
}

impl FromStr for MailboxKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "imap" => Ok(MailboxKind::Imap),
            "exchange" | "ews" => Ok(MailboxKind::Exchange),
            other => Err(format!(
                "unknown mailbox type '{}', expected IMAP or Exchange",
                other
            )),
        }
    }
}

/// Connection and selection settings for the polled mailbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailboxConfig {
    #[serde(rename = "type", default)]
    pub kind: MailboxKind,

    /// Host name. IMAP falls back to `imap.gmail.com`; Exchange requires it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,

    /// IMAP port (default: 993 for IMAPS).
    #[serde(default = "default_imap_port")]
    pub port: u16,

    /// Login name, typically the email address.
    #[serde(default)]
    pub email: String,

    /// Password in plain text. Prefer `passwordFile` or `passwordEnvVar`.
    #[serde(
        default,
        alias = "passwordInsecure",
        skip_serializing_if = "Option::is_none"
    )]
    pub password: Option<String>,

    /// File holding the password (Docker secrets).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_file: Option<String>,

    /// Environment variable holding the password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env_var: Option<String>,

    /// Folder to poll; `/` separates nested Exchange folders.
    #[serde(default = "default_folder")]
    pub folder: String,

    /// Look the folder up under the Exchange public folder root.
    #[serde(default)]
    pub public_folder: bool,

    /// Delete messages from the server after a complete export.
    #[serde(default)]
    pub delete: bool,

    /// Mark messages read after a complete export.
    #[serde(default)]
    pub mark_read: bool,

    #[serde(default)]
    pub filters: FilterSpec,
}

fn default_imap_port() -> u16 {
    993
}

fn default_folder() -> String {
    "inbox".to_string()
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            kind: MailboxKind::default(),
            server: None,
            port: default_imap_port(),
            email: String::new(),
            password: None,
            password_file: None,
            password_env_var: None,
            folder: default_folder(),
            public_folder: false,
            delete: false,
            mark_read: false,
            filters: FilterSpec::default(),
        }
    }
}

impl MailboxConfig {
    /// The server to connect to, after applying the protocol default.
    pub fn effective_server(&self) -> Option<String> {
        let configured = self
            .server
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());

        match (configured, self.kind) {
            (Some(server), _) => Some(server.to_string()),
            (None, MailboxKind::Imap) => Some(DEFAULT_IMAP_SERVER.to_string()),
            (None, MailboxKind::Exchange) => None,
        }
    }

    fn password_sources(&self) -> [SecretSource<'_>; 3] {
        [
            SecretSource::Direct(self.password.as_deref().unwrap_or_default()),
            SecretSource::File(self.password_file.as_deref().unwrap_or_default()),
            SecretSource::EnvVar(self.password_env_var.as_deref().unwrap_or_default()),
        ]
    }

    pub fn has_password_source(&self) -> bool {
        has_secret_source(&self.password_sources())
    }

    /// Resolves the password: direct value, then file, then environment variable.
    pub fn resolve_password(&self) -> Result<SecretString, SecretError> {
        resolve_secret(&self.password_sources())
    }
}

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}', expected text or json", other)),
        }
    }
}
