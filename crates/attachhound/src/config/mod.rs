pub mod loader;
pub mod schema;

pub use loader::{
    apply_overrides, load_config, load_config_from_str, read_config_file, validate_config,
    ConfigFormat, ConfigOverrides,
};
pub use schema::{Config, LogFormat, MailboxConfig, MailboxKind, DEFAULT_IMAP_SERVER};
