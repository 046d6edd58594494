//! # Channel Harness CLI (`chx`)
//!
//! ## Usage
//!
//! ```bash
//! chx --config ./config/chx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `chx sources` | Show session mode and directory health |
//! | `chx resolve <id>` | Resolve a channel, dialog, or user and print its handle |
//! | `chx scan <id>` | Cursor scan (user session) with an optional single bound |
//! | `chx scan-naive <id>` | Id-window scan for bot sessions |
//!
//! Logs and live records go to stderr; logs are filtered with `RUST_LOG`
//! (default `info,channel_harness=info`). The collected records go to
//! stdout unless `--output` is given.
//!
//! Both scans accept `--archive <file.jsonl>` (plus an optional
//! `--archive-media <dir>`) to replay archived messages offline instead of
//! connecting to the gateway.

use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use channel_harness::config;
use channel_harness::ingest::{self, Replay, Strategy};
use channel_harness::models::ScanBound;
use channel_harness::sink::LiveMode;
use channel_harness::sources;

/// Channel Harness CLI: collect channel messages and their documents.
#[derive(Parser)]
#[command(
    name = "chx",
    about = "Channel Harness: collect messages and documents from messaging-platform channels",
    version
)]
struct Cli {
    /// Path to configuration file (TOML, or a legacy flat `.json`).
    #[arg(long, global = true, default_value = "./config/chx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the configured session mode and directory health.
    Sources,

    /// Resolve an entity and print its handle as JSON.
    Resolve {
        /// Numeric id or username.
        #[arg(allow_hyphen_values = true)]
        identifier: String,
    },

    /// Join a channel and stream its history (user sessions only).
    ///
    /// At most one of `--max-id`, `--newer-than`, `--older-than` may be
    /// given. Without any, the whole history is scanned newest first.
    Scan {
        /// Channel id or username.
        #[arg(allow_hyphen_values = true)]
        identifier: String,

        /// Only messages with id <= this value.
        #[arg(long, group = "bound")]
        max_id: Option<i64>,

        /// Only messages at or after this time, oldest first (RFC 3339 or YYYY-MM-DD).
        #[arg(long, group = "bound", value_parser = parse_timestamp)]
        newer_than: Option<DateTime<Utc>>,

        /// Only messages before this time, newest first (RFC 3339 or YYYY-MM-DD).
        #[arg(long, group = "bound", value_parser = parse_timestamp)]
        older_than: Option<DateTime<Utc>>,

        /// Download document attachments into the document store.
        #[arg(long)]
        download: bool,

        /// Write the collected records to this file instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Live output of records with downloads, on stderr. Defaults to
        /// `human` when stderr is a TTY.
        #[arg(long, value_enum)]
        live: Option<LiveMode>,

        #[command(flatten)]
        replay: ReplayArgs,
    },

    /// Fetch message ids window by window (works with bot sessions).
    ScanNaive {
        /// Channel or dialog id or username.
        #[arg(allow_hyphen_values = true)]
        identifier: String,

        /// First message id to fetch.
        #[arg(long, default_value_t = 1)]
        offset: i64,

        /// Crash journal path. Defaults to a unique file under `[scan].crash_log_dir`.
        #[arg(long)]
        journal: Option<PathBuf>,

        /// Write the collected records to this file instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        replay: ReplayArgs,
    },
}

#[derive(Args)]
struct ReplayArgs {
    /// Replay a JSON-lines message archive instead of connecting to the gateway.
    #[arg(long)]
    archive: Option<PathBuf>,

    /// Directory of media files named by message id, for `--archive`.
    #[arg(long, requires = "archive")]
    archive_media: Option<PathBuf>,
}

impl ReplayArgs {
    fn into_replay(self) -> Option<Replay> {
        self.archive.map(|archive| Replay {
            archive,
            media_dir: self.archive_media,
        })
    }
}

/// Parse `--newer-than` / `--older-than` values.
fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| format!("invalid timestamp '{}': expected RFC 3339 or YYYY-MM-DD", s))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,channel_harness=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let cfg = match config::load_config(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            tracing::error!(critical = true, error = %format!("{:#}", err), "no usable configuration");
            return Err(err);
        }
    };

    match cli.command {
        Commands::Sources => {
            sources::list_sources(&cfg)?;
        }
        Commands::Resolve { identifier } => {
            ingest::run_resolve(&cfg, &identifier).await?;
        }
        Commands::Scan {
            identifier,
            max_id,
            newer_than,
            older_than,
            download,
            output,
            live,
            replay,
        } => {
            let bound = ScanBound::from_options(max_id, newer_than, older_than)?;
            let live = live.unwrap_or_else(LiveMode::default_for_tty);
            ingest::run_scan(
                &cfg,
                &identifier,
                Strategy::Cursor { bound, download },
                live,
                output.as_deref(),
                replay.into_replay().as_ref(),
            )
            .await?;
        }
        Commands::ScanNaive {
            identifier,
            offset,
            journal,
            output,
            replay,
        } => {
            ingest::run_scan(
                &cfg,
                &identifier,
                Strategy::Naive { offset, journal },
                LiveMode::Off,
                output.as_deref(),
                replay.into_replay().as_ref(),
            )
            .await?;
        }
    }

    Ok(())
}
