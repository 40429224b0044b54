//! Secret resolution for the mailbox password.
//!
//! A password can be given directly, read from a file (Docker secrets) or
//! taken from a named environment variable. The first source that is set
//! wins; an unset or empty source is skipped.

use std::path::{Path, PathBuf};

use secrecy::SecretString;

/// Error type for secret resolution failures.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No password source provided (need one of: password, passwordFile, passwordEnvVar)")]
    NoSourceProvided,

    #[error("Failed to read secret from file '{path}': {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },
}

pub type Result<T> = std::result::Result<T, SecretError>;

/// One place a secret may come from.
#[derive(Debug, Clone, Copy)]
pub enum SecretSource<'a> {
    /// The value itself.
    Direct(&'a str),
    /// A file holding the value; `~` is expanded and surrounding whitespace trimmed.
    File(&'a str),
    /// Name of an environment variable holding the value.
    EnvVar(&'a str),
}

impl SecretSource<'_> {
    fn is_set(&self) -> bool {
        match self {
            SecretSource::Direct(s) | SecretSource::File(s) | SecretSource::EnvVar(s) => {
                !s.is_empty()
            }
        }
    }

    fn read(&self) -> Result<SecretString> {
        match *self {
            SecretSource::Direct(value) => Ok(SecretString::from(value)),
            SecretSource::File(path) => {
                let path = expand_home(path);
                std::fs::read_to_string(&path)
                    .map(|content| SecretString::from(content.trim()))
                    .map_err(|e| SecretError::FileReadError { path, source: e })
            }
            SecretSource::EnvVar(name) => match std::env::var(name) {
                // Env vars may carry a trailing newline
                Ok(value) => Ok(SecretString::from(value.trim())),
                Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarNotSet {
                    name: name.to_string(),
                }),
                Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
                    name: name.to_string(),
                }),
            },
        }
    }
}

/// Resolves a secret from the first source that is set.
///
/// A source that is set but unreadable is an error; later sources are not
/// consulted in that case.
pub fn resolve_secret(sources: &[SecretSource<'_>]) -> Result<SecretString> {
    sources
        .iter()
        .find(|source| source.is_set())
        .ok_or(SecretError::NoSourceProvided)?
        .read()
}

/// Checks if at least one source is configured (non-empty).
pub fn has_secret_source(sources: &[SecretSource<'_>]) -> bool {
    sources.iter().any(SecretSource::is_set)
}

/// Expands a leading `~` to the current user's home directory.
///
/// `~user/path` is not supported and is returned unchanged.
pub fn expand_home<P: AsRef<Path>>(path: P) -> PathBuf {
    let path = path.as_ref();
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}
