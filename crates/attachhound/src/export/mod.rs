//! Writing attachments to disk.
//!
//! Every layout writes with create-new semantics: an existing file is never
//! overwritten, a clash is resolved by numbering (`name_2.ext`, `name_3.ext`, ...).

pub mod sanitize;

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::mail::{Attachment, Message};

pub use sanitize::sanitize_filename;

/// Highest numeric suffix tried before giving up on a name.
const MAX_SUFFIX: u32 = 1000;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Output directory '{path}' is not writable: {source}")]
    DirectoryNotWritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No free filename left for '{0}'")]
    NameExhausted(PathBuf),
}

/// How exported files are laid out under the output directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExporterKind {
    /// `dir/<filename>`
    #[default]
    Simple,
    /// `dir/<subject>_<sender>_<date>_<filename>`
    Prefixed,
    /// `dir/<date>_<message id>/<filename>`
    #[serde(alias = "per_message")]
    PerMessage,
}

impl fmt::Display for ExporterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExporterKind::Simple => "simple",
            ExporterKind::Prefixed => "prefixed",
            ExporterKind::PerMessage => "per-message",
        };
        f.write_str(name)
    }
}

impl FromStr for ExporterKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simple" => Ok(ExporterKind::Simple),
            "prefixed" => Ok(ExporterKind::Prefixed),
            "per-message" | "per_message" | "permessage" => Ok(ExporterKind::PerMessage),
            other => Err(format!(
                "unknown exporter '{}', expected simple, prefixed or per-message",
                other
            )),
        }
    }
}

/// An attachment that could not be written.
#[derive(Debug)]
pub struct AttachmentFailure {
    /// Filename as sent by the server.
    pub filename: String,
    pub error: ExportError,
}

/// Result of exporting one message.
#[derive(Debug, Default)]
pub struct ExportOutcome {
    pub written: Vec<PathBuf>,
    pub failures: Vec<AttachmentFailure>,
}

impl ExportOutcome {
    /// Every attachment was written (vacuously true without attachments).
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// The message may be recorded as processed: at least one file was
    /// written, or there was nothing to write.
    pub fn should_record(&self) -> bool {
        !self.written.is_empty() || self.failures.is_empty()
    }

    pub fn written_paths(&self) -> Vec<String> {
        self.written
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect()
    }
}

/// Writes message attachments under one output directory.
#[derive(Debug, Clone)]
pub struct Exporter {
    kind: ExporterKind,
    directory: PathBuf,
}

impl Exporter {
    pub fn new<P: AsRef<Path>>(kind: ExporterKind, directory: P) -> Self {
        Self {
            kind,
            directory: directory.as_ref().to_path_buf(),
        }
    }

    pub fn kind(&self) -> ExporterKind {
        self.kind
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Creates the output directory if needed.
    pub fn prepare(&self) -> Result<(), ExportError> {
        ensure_directory(&self.directory)
    }

    /// Writes every attachment of `message`.
    ///
    /// Fails only when the target directory cannot be created; a failure for
    /// one attachment is reported in the outcome and does not stop the rest.
    pub fn export(&self, message: &Message) -> Result<ExportOutcome, ExportError> {
        let mut outcome = ExportOutcome::default();
        if message.attachments.is_empty() {
            return Ok(outcome);
        }

        let target = self.target_directory(message);
        ensure_directory(&target)?;

        for attachment in &message.attachments {
            let name = self.file_name(message, attachment);
            match write_new_file(&target, &name, &attachment.content) {
                Ok(path) => {
                    debug!(
                        "Wrote {} bytes for message {} to {}",
                        attachment.size(),
                        message.id,
                        path.display()
                    );
                    outcome.written.push(path);
                }
                Err(error) => {
                    warn!(
                        "Failed to export attachment '{}' of message {}: {}",
                        attachment.filename, message.id, error
                    );
                    outcome.failures.push(AttachmentFailure {
                        filename: attachment.filename.clone(),
                        error,
                    });
                }
            }
        }

        Ok(outcome)
    }

    fn target_directory(&self, message: &Message) -> PathBuf {
        match self.kind {
            ExporterKind::Simple | ExporterKind::Prefixed => self.directory.clone(),
            ExporterKind::PerMessage => self.directory.join(sanitize_filename(&format!(
                "{}_{}",
                message.received_at.format("%Y-%m-%d"),
                message.id
            ))),
        }
    }

    fn file_name(&self, message: &Message, attachment: &Attachment) -> String {
        let filename = sanitize_filename(&attachment.filename);
        match self.kind {
            ExporterKind::Simple | ExporterKind::PerMessage => filename,
            ExporterKind::Prefixed => {
                let prefix = sanitize_filename(&format!(
                    "{}_{}_{}",
                    message.subject,
                    message.sender,
                    message.received_at.format("%Y-%m-%dT%H-%M-%S")
                ));
                sanitize_filename(&format!("{}_{}", prefix, filename).replace(' ', "_"))
            }
        }
    }
}

fn ensure_directory(path: &Path) -> Result<(), ExportError> {
    if !path.is_dir() {
        std::fs::create_dir_all(path).map_err(|e| ExportError::DirectoryNotWritable {
            path: path.to_path_buf(),
            source: e,
        })?;
    }
    Ok(())
}

/// Creates `directory/filename`, or the first free numbered variant, and
/// writes `content` to it.
fn write_new_file(directory: &Path, filename: &str, content: &[u8]) -> Result<PathBuf, ExportError> {
    let (base, ext) = sanitize::split_extension(filename);

    for counter in 1..=MAX_SUFFIX {
        let candidate = if counter == 1 {
            filename.to_string()
        } else {
            sanitize::fit_name(base, &format!("_{}", counter), ext)
        };
        let path = directory.join(&candidate);

        // create_new is an atomic check-and-create (O_CREAT | O_EXCL)
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(mut file) => {
                if let Err(e) = file.write_all(content).and_then(|_| file.sync_all()) {
                    drop(file);
                    let _ = std::fs::remove_file(&path);
                    return Err(ExportError::WriteFile { path, source: e });
                }
                return Ok(path);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(ExportError::WriteFile { path, source: e }),
        }
    }

    Err(ExportError::NameExhausted(directory.join(filename)))
}
