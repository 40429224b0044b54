use std::path::PathBuf;
use thiserror::Error;

use crate::export::ExportError;
use crate::filter::FilterError;
use crate::mail::MailboxError;
use crate::secrets::SecretError;

#[derive(Error, Debug)]
pub enum AttachhoundError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Mailbox error: {0}")]
    Mailbox(#[from] MailboxError),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    #[error("Filter error: {0}")]
    Filter(#[from] FilterError),

    #[error("Failed to install signal handler: {0}")]
    Signal(String),

    #[error("Failed to start async runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("Poll cycle aborted, see log for the cause")]
    CycleAborted,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Failed to parse config YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Invalid filter: {0}")]
    InvalidFilter(#[from] FilterError),

    #[error("Mailbox password could not be resolved: {0}")]
    Password(#[from] SecretError),
}

pub type Result<T> = std::result::Result<T, AttachhoundError>;
