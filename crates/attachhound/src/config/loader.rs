use std::path::Path;

use crate::config::schema::{Config, LogFormat, MailboxKind};
use crate::error::ConfigError;
use crate::export::ExporterKind;

/// Longest accepted check interval.
pub const MAX_INTERVAL_SECS: u64 = 365 * 24 * 60 * 60;

/// Serialization format of a config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Yaml,
}

impl ConfigFormat {
    /// `.yaml` and `.yml` files are YAML, everything else JSON.
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("yaml") | Some("yml") => ConfigFormat::Yaml,
            _ => ConfigFormat::Json,
        }
    }
}

/// Values from the environment and the command line. Every field that is
/// set replaces the corresponding config file value; flags can only turn a
/// feature on.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub mailbox_kind: Option<MailboxKind>,
    /// IMAP server, used when the final mailbox type is IMAP.
    pub server: Option<String>,
    /// Exchange server, used when the final mailbox type is Exchange.
    pub exchange_server: Option<String>,
    pub port: Option<u16>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub folder: Option<String>,
    pub public_folder: bool,
    pub attachment_dir: Option<String>,
    pub database: Option<String>,
    pub exporter: Option<ExporterKind>,
    pub interval: Option<u64>,
    pub delete: bool,
    pub mark_read: bool,
    pub log_format: Option<LogFormat>,
}

/// Builds the effective configuration: the file at `path` (or defaults),
/// then `overrides`, then validation.
pub fn load_config(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(path) => read_config_file(path)?,
        None => Config::default(),
    };

    apply_overrides(&mut config, overrides);
    validate_config(&config)?;

    Ok(config)
}

pub fn read_config_file(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content, ConfigFormat::from_path(path))
}

pub fn load_config_from_str(content: &str, format: ConfigFormat) -> Result<Config, ConfigError> {
    let config = match format {
        ConfigFormat::Json => serde_json::from_str(content)?,
        ConfigFormat::Yaml => serde_yaml::from_str(content)?,
    };
    Ok(config)
}

pub fn apply_overrides(config: &mut Config, overrides: &ConfigOverrides) {
    let mailbox = &mut config.mailbox;

    if let Some(kind) = overrides.mailbox_kind {
        mailbox.kind = kind;
    }

    let server = match mailbox.kind {
        MailboxKind::Imap => &overrides.server,
        MailboxKind::Exchange => &overrides.exchange_server,
    };
    if let Some(server) = server {
        mailbox.server = Some(server.clone());
    }

    if let Some(port) = overrides.port {
        mailbox.port = port;
    }
    if let Some(email) = &overrides.email {
        mailbox.email = email.clone();
    }
    if let Some(password) = &overrides.password {
        mailbox.password = Some(password.clone());
    }
    if let Some(folder) = &overrides.folder {
        mailbox.folder = folder.clone();
    }
    mailbox.public_folder |= overrides.public_folder;
    mailbox.delete |= overrides.delete;
    mailbox.mark_read |= overrides.mark_read;

    if let Some(dir) = &overrides.attachment_dir {
        config.attachment_dir = dir.clone();
    }
    if let Some(database) = &overrides.database {
        config.database = database.clone();
    }
    if let Some(exporter) = overrides.exporter {
        config.exporter = exporter;
    }
    if let Some(interval) = overrides.interval {
        config.interval = interval;
    }
    if let Some(format) = overrides.log_format {
        config.log_format = format;
    }
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mailbox = &config.mailbox;

    if mailbox.email.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "No email address configured (set EMAIL_ADDRESS or --email)".to_string(),
        });
    }

    if !mailbox.has_password_source() {
        return Err(ConfigError::Validation {
            message: "No password configured (set EMAIL_PASSWORD, --password, passwordFile or passwordEnvVar)"
                .to_string(),
        });
    }

    if mailbox.effective_server().is_none() {
        return Err(ConfigError::Validation {
            message: "Exchange mailbox requires a server (set EXCHANGE_SERVER or --exchange-server)"
                .to_string(),
        });
    }

    if mailbox.kind == MailboxKind::Imap && mailbox.port == 0 {
        return Err(ConfigError::Validation {
            message: "IMAP port must not be 0".to_string(),
        });
    }

    if mailbox.folder.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "Folder must not be empty".to_string(),
        });
    }

    if config.interval == 0 {
        return Err(ConfigError::Validation {
            message: "Check interval must be at least 1 second".to_string(),
        });
    }

    if config.interval > MAX_INTERVAL_SECS {
        return Err(ConfigError::Validation {
            message: format!(
                "Check interval must be at most {} seconds (one year)",
                MAX_INTERVAL_SECS
            ),
        });
    }

    mailbox.filters.validate()?;

    Ok(())
}
