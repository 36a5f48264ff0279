//! # HomeCase Digest CLI (`hcdigest`)
//!
//! The `hcdigest` binary runs the ingestion pipeline and a few helper
//! commands around it.
//!
//! ## Usage
//!
//! ```bash
//! hcdigest --config ./config/hcdigest.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `hcdigest run` | Fetch, store and notify (default when no command is given) |
//! | `hcdigest init` | Create the messages table in the configured store |
//! | `hcdigest parse <file>` | Print what the parser extracts from a notice |
//! | `hcdigest history` | List the most recently stored notices |
//!
//! ## Exit codes
//!
//! `run` exits `0` when at least one new notice was stored, `2` when there
//! was nothing new, and `1` on any failure. Other commands exit `0` or `1`.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use homecase_digest::config::{self, Config, LoggingConfig};
use homecase_digest::ingest::{self, PipelineOptions};
use homecase_digest::mail::SmtpMailer;
use homecase_digest::notify::{self, FormattingOptions, Notifier};
use homecase_digest::portal::PortalClient;
use homecase_digest::{db, history, logging, parse};

/// HomeCase Digest: stores utility-consumption notices from the HomeCase
/// portal and emails a summary of each new one.
#[derive(Parser)]
#[command(name = "hcdigest", version)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Secrets may be left out and supplied through `HOMECASE_PASSWORD`
    /// and `SMTP_PASSWORD` (a `.env` file is read as well).
    #[arg(long, global = true, default_value = "./config/hcdigest.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline once: login, fetch, parse, store, notify.
    Run,

    /// Create the messages table and indexes.
    ///
    /// Only `[store]` needs to be configured. Safe to run repeatedly.
    Init,

    /// Parse a saved notice and print the extracted values as JSON.
    ///
    /// Does not touch the network or the store.
    Parse {
        /// Text file containing one notice.
        file: PathBuf,

        /// Also print the email that would be sent for it.
        #[arg(long)]
        email: bool,
    },

    /// Show the most recently stored notices.
    History {
        /// Maximum number of rows to list.
        #[arg(long, default_value_t = 12)]
        limit: i64,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let result = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => return run(&cli.config).await,
        Commands::Init => init(&cli.config).await,
        Commands::Parse { file, email } => parse_file(&cli.config, &file, email),
        Commands::History { limit } => show_history(&cli.config, limit).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config_path: &Path) -> ExitCode {
    let cfg = match config::read_config(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            if logging::init_logging(&LoggingConfig::default()).is_ok() {
                tracing::error!(stage = "config", error = %e, "Configuration error");
            } else {
                eprintln!("Error: {}", e);
            }
            return ExitCode::from(1);
        }
    };

    if let Err(e) = logging::init_logging(&cfg.logging) {
        eprintln!("Error: {:#}", e);
        return ExitCode::from(1);
    }
    tracing::info!("Starting HomeCase digest run");

    if let Err(e) = cfg.validate() {
        tracing::error!(stage = "config", error = %e, "Configuration error");
        return ExitCode::from(1);
    }

    let store = match db::open_store(&cfg.store).await {
        Ok(store) => store,
        Err(e) => {
            tracing::error!(stage = "store", error = %e, "Could not initialize database");
            return ExitCode::from(1);
        }
    };

    let mailer = match SmtpMailer::new(&cfg.smtp) {
        Ok(mailer) => mailer,
        Err(e) => {
            tracing::error!(stage = "config", error = %e, "Could not set up SMTP transport");
            store.close().await;
            return ExitCode::from(1);
        }
    };
    let notifier = Notifier::new(mailer, cfg.sender().trim());
    let opts = PipelineOptions {
        recipients: trimmed(&cfg.email.to),
        cc: trimmed(&cfg.email.cc),
        formatting: FormattingOptions::from_config(&cfg.email),
    };

    let mut source = PortalClient::new(&cfg.portal);
    let report = ingest::run_pipeline(&mut source, store.as_ref(), &notifier, &opts).await;
    store.close().await;

    tracing::info!(
        exit_code = report.exit_code(),
        states = ?report.states,
        fetched = report.fetched,
        persisted = report.persisted,
        notified = report.notified,
        notify_failures = report.notify_failures,
        parse_failures = report.parse_failures,
        store_failures = report.store_failures,
        "Run finished"
    );
    ExitCode::from(report.exit_code())
}

fn trimmed(addresses: &[String]) -> Vec<String> {
    addresses
        .iter()
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .collect()
}

async fn init(config_path: &Path) -> anyhow::Result<()> {
    let cfg = config::read_config(config_path)?;
    logging::init_logging(&cfg.logging)?;
    if cfg.store.url.trim().is_empty() {
        anyhow::bail!("Missing required configuration: store.url");
    }

    let store = db::open_store(&cfg.store)
        .await
        .context("failed to initialize database")?;
    let count = store.count().await?;
    store.close().await;

    println!("Database initialized successfully ({} stored message(s)).", count);
    Ok(())
}

fn parse_file(config_path: &Path, file: &Path, show_email: bool) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let parsed = parse::parse(&text)?;
    println!("{}", serde_json::to_string_pretty(&parsed)?);

    if show_email {
        // An unreadable config only affects greeting and signature.
        let email = config::read_config(config_path)
            .map(|cfg| cfg.email)
            .unwrap_or_else(|_| Config::default().email);
        let opts = FormattingOptions::from_config(&email);
        println!();
        println!("Subject: {}", notify::subject(&parsed));
        println!();
        println!("{}", notify::format_body(&parsed, &opts));
    }
    Ok(())
}

async fn show_history(config_path: &Path, limit: i64) -> anyhow::Result<()> {
    let cfg = config::read_config(config_path)?;
    logging::init_logging(&cfg.logging)?;
    if cfg.store.url.trim().is_empty() {
        anyhow::bail!("Missing required configuration: store.url");
    }
    history::run_history(&cfg, limit).await
}
