use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::Ordering;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use attachhound::error::{AttachhoundError, ConfigError};
use attachhound::scheduler::{PollSettings, Poller};
use attachhound::{
    build_mailbox, load_config, Config, ConfigOverrides, Exporter, ExporterKind, LogFormat,
    MailboxKind, MetadataStore,
};

/// Download attachments from an IMAP or Exchange mailbox and record
/// processed messages in SQLite.
#[derive(Parser, Debug)]
#[command(name = "attachhound", version, about)]
struct Cli {
    /// Config file (JSON, or YAML for .yaml/.yml)
    #[arg(short, long, env = "ATTACHHOUND_CONFIG")]
    config: Option<PathBuf>,

    /// Mailbox type: IMAP or Exchange [default: IMAP]
    #[arg(long, env = "MAILBOX_TYPE")]
    mailbox_type: Option<MailboxKind>,

    /// IMAP server [default: imap.gmail.com]
    #[arg(long, env = "IMAP_SERVER")]
    server: Option<String>,

    /// Exchange server host name or EWS URL
    #[arg(long, env = "EXCHANGE_SERVER")]
    exchange_server: Option<String>,

    /// IMAP port [default: 993]
    #[arg(long, env = "IMAP_PORT")]
    port: Option<u16>,

    /// Email address used to log in
    #[arg(long, env = "EMAIL_ADDRESS")]
    email: Option<String>,

    /// Password for the email account
    #[arg(long, env = "EMAIL_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Seconds between mailbox checks [default: 60]
    #[arg(long, env = "CHECK_INTERVAL")]
    interval: Option<u64>,

    /// SQLite database of processed messages [default: .attachhound/processed_emails.db]
    #[arg(long)]
    db: Option<String>,

    /// Folder to fetch messages from [default: inbox]
    #[arg(long)]
    folder: Option<String>,

    /// Look the folder up among Exchange public folders
    #[arg(long)]
    public_folder: bool,

    /// Directory for downloaded attachments [default: .attachhound/attachments]
    #[arg(long)]
    attachment_dir: Option<String>,

    /// File layout: simple, prefixed or per-message [default: simple]
    #[arg(long)]
    exporter: Option<ExporterKind>,

    /// Delete messages from the server after all attachments were saved
    #[arg(long)]
    delete: bool,

    /// Mark messages read after all attachments were saved
    #[arg(long)]
    mark_read: bool,

    /// Run a single poll cycle and exit
    #[arg(long)]
    once: bool,

    /// Log output format: text or json [default: text]
    #[arg(long, env = "ATTACHHOUND_LOG_FORMAT")]
    log_format: Option<LogFormat>,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            mailbox_kind: self.mailbox_type,
            server: self.server.clone(),
            exchange_server: self.exchange_server.clone(),
            port: self.port,
            email: self.email.clone(),
            password: self.password.clone(),
            folder: self.folder.clone(),
            public_folder: self.public_folder,
            attachment_dir: self.attachment_dir.clone(),
            database: self.db.clone(),
            exporter: self.exporter,
            interval: self.interval,
            delete: self.delete,
            mark_read: self.mark_read,
            log_format: self.log_format,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref(), &cli.overrides()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("attachhound: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_logging(config.log_format) {
        eprintln!("attachhound: failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    match run(config, cli.once) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

/// Routes `log` records into tracing and installs the fmt subscriber.
/// `RUST_LOG` overrides the default `info` level.
fn init_logging(format: LogFormat) -> Result<(), Box<dyn std::error::Error>> {
    tracing_log::LogTracer::init()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match format {
        LogFormat::Text => tracing::subscriber::set_global_default(builder.finish())?,
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
    }
    Ok(())
}

fn log_history(store: &MetadataStore) -> Result<(), AttachhoundError> {
    let processed = store.count()?;
    match store.recent(1)?.into_iter().next() {
        Some(last) => info!(
            processed,
            last_message = %last.message_id,
            last_subject = %last.subject,
            last_processed_at = %last.processed_at.to_rfc3339(),
            "Resuming with existing records"
        ),
        None => info!("No messages processed yet"),
    }
    Ok(())
}

fn run(config: Config, once: bool) -> Result<(), AttachhoundError> {
    info!(
        mailbox = %config.mailbox.kind,
        email = %config.mailbox.email,
        folder = %config.mailbox.folder,
        interval_secs = config.interval,
        "Starting attachhound"
    );

    let password = config
        .mailbox
        .resolve_password()
        .map_err(ConfigError::from)?;

    let store = MetadataStore::open(&config.database_path())?;
    let exporter = Exporter::new(config.exporter, config.attachment_dir_path());
    exporter.prepare()?;
    info!(
        database = %config.database_path().display(),
        attachments = %exporter.directory().display(),
        exporter = %exporter.kind(),
        "Storage ready"
    );
    log_history(&store)?;

    let mailbox = build_mailbox(&config.mailbox, password)?;
    let mut poller = Poller::new(mailbox, store, exporter, PollSettings::from_config(&config));

    let shutdown = poller.shutdown_handle();
    ctrlc::set_handler(move || {
        info!("Shutdown requested, stopping after the current cycle");
        shutdown.store(true, Ordering::Release);
    })
    .map_err(|e| AttachhoundError::Signal(e.to_string()))?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(AttachhoundError::Runtime)?;

    if once {
        let report = runtime.block_on(poller.run_cycle());
        if report.aborted {
            return Err(AttachhoundError::CycleAborted);
        }
    } else {
        runtime.block_on(poller.run());
    }

    Ok(())
}
