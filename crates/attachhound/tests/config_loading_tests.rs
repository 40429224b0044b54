//! Configuration loading tests.
//!
//! Config files are written to a temp directory and loaded through
//! `load_config`, the same path the binary takes.

use std::path::PathBuf;

use secrecy::ExposeSecret;
use serial_test::serial;
use tempfile::TempDir;

use attachhound::error::ConfigError;
use attachhound::{load_config, ConfigOverrides, ExporterKind, MailboxKind};

fn write_config(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).expect("Failed to write config file");
    path
}

#[test]
fn test_load_yaml_file() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        "attachhound.yaml",
        r#"
mailbox:
  type: Exchange
  server: https://mail.example.com/EWS/Exchange.asmx
  email: reports@example.com
  password: hunter2
  folder: Invoices/2024
  publicFolder: true
  filters:
    isRead: false
    before: "01.06.2024"
exporter: prefixed
attachmentDir: /srv/attachments
interval: 120
"#,
    );

    let config = load_config(Some(&path), &ConfigOverrides::default()).unwrap();

    assert_eq!(config.mailbox.kind, MailboxKind::Exchange);
    assert_eq!(config.mailbox.folder, "Invoices/2024");
    assert!(config.mailbox.public_folder);
    assert_eq!(config.mailbox.filters.is_read, Some(false));
    assert_eq!(config.mailbox.filters.before.as_deref(), Some("01.06.2024"));
    assert_eq!(config.exporter, ExporterKind::Prefixed);
    assert_eq!(config.attachment_dir, "/srv/attachments");
    assert_eq!(config.interval, 120);
}

#[test]
fn test_load_json_file() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        "attachhound.json",
        r#"{
            "mailbox": {
                "email": "reports@example.com",
                "passwordInsecure": "hunter2",
                "markRead": true
            },
            "database": "/var/lib/attachhound/processed.db"
        }"#,
    );

    let config = load_config(Some(&path), &ConfigOverrides::default()).unwrap();

    assert_eq!(config.mailbox.kind, MailboxKind::Imap);
    assert_eq!(config.mailbox.effective_server().as_deref(), Some("imap.gmail.com"));
    assert_eq!(config.mailbox.port, 993);
    assert!(config.mailbox.mark_read);
    assert_eq!(
        config.database_path(),
        PathBuf::from("/var/lib/attachhound/processed.db")
    );
}

#[test]
fn test_overrides_take_precedence_over_file() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        "attachhound.yml",
        "mailbox:\n  email: file@example.com\n  password: from-file\n  server: imap.file.example\ninterval: 30\n",
    );

    let overrides = ConfigOverrides {
        server: Some("imap.cli.example".to_string()),
        email: Some("cli@example.com".to_string()),
        interval: Some(300),
        delete: true,
        ..ConfigOverrides::default()
    };
    let config = load_config(Some(&path), &overrides).unwrap();

    assert_eq!(config.mailbox.server.as_deref(), Some("imap.cli.example"));
    assert_eq!(config.mailbox.email, "cli@example.com");
    assert_eq!(config.interval, 300);
    assert!(config.mailbox.delete);
    // Untouched values come from the file
    assert_eq!(
        config.mailbox.resolve_password().unwrap().expose_secret(),
        "from-file"
    );
}

#[test]
fn test_invalid_files_are_rejected() {
    struct Case {
        name: &'static str,
        file: &'static str,
        content: &'static str,
    }

    let cases = [
        Case {
            name: "malformed json",
            file: "bad.json",
            content: "{ not json",
        },
        Case {
            name: "malformed yaml",
            file: "bad.yaml",
            content: "mailbox: [unterminated",
        },
        Case {
            name: "unknown exporter",
            file: "exporter.json",
            content: r#"{"mailbox": {"email": "a@example.com", "password": "x"}, "exporter": "zip"}"#,
        },
        Case {
            name: "missing email",
            file: "noemail.json",
            content: r#"{"mailbox": {"password": "x"}}"#,
        },
        Case {
            name: "bad cutoff date",
            file: "cutoff.json",
            content: r#"{"mailbox": {"email": "a@example.com", "password": "x", "filters": {"before": "2024-06-01"}}}"#,
        },
    ];

    let dir = TempDir::new().unwrap();
    for case in cases {
        let path = write_config(&dir, case.file, case.content);
        assert!(
            load_config(Some(&path), &ConfigOverrides::default()).is_err(),
            "case: {}",
            case.name
        );
    }
}

#[test]
fn test_missing_file_is_reported() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("absent.yaml");

    let err = load_config(Some(&path), &ConfigOverrides::default()).unwrap_err();
    assert!(matches!(err, ConfigError::ReadFile { .. }));
}

#[test]
fn test_password_file_is_resolved() {
    let dir = TempDir::new().unwrap();
    let secret = write_config(&dir, "password.txt", "s3cret\n");
    let path = write_config(
        &dir,
        "attachhound.json",
        &format!(
            r#"{{"mailbox": {{"email": "a@example.com", "passwordFile": "{}"}}}}"#,
            secret.display()
        ),
    );

    let config = load_config(Some(&path), &ConfigOverrides::default()).unwrap();
    let password = config.mailbox.resolve_password().unwrap();
    assert_eq!(password.expose_secret(), "s3cret");
}

#[test]
#[serial]
fn test_password_env_var_is_resolved() {
    std::env::set_var("ATTACHHOUND_TEST_CONFIG_PASSWORD", "from-env");
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        "attachhound.json",
        r#"{"mailbox": {"email": "a@example.com", "passwordEnvVar": "ATTACHHOUND_TEST_CONFIG_PASSWORD"}}"#,
    );

    let config = load_config(Some(&path), &ConfigOverrides::default()).unwrap();
    let password = config.mailbox.resolve_password().unwrap();
    assert_eq!(password.expose_secret(), "from-env");

    std::env::remove_var("ATTACHHOUND_TEST_CONFIG_PASSWORD");
}

#[test]
fn test_direct_password_override_wins() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        "attachhound.json",
        r#"{"mailbox": {"email": "a@example.com", "passwordFile": "/nonexistent/pw"}}"#,
    );

    let overrides = ConfigOverrides {
        password: Some("from-cli".to_string()),
        ..ConfigOverrides::default()
    };
    let config = load_config(Some(&path), &overrides).unwrap();
    assert_eq!(
        config.mailbox.resolve_password().unwrap().expose_secret(),
        "from-cli"
    );
}
