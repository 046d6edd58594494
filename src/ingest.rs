//! Ingestion pipeline orchestration.
//!
//! Coordinates one run: connect (or open an archive replay) → resolve the channel handle → pick a scan
//! strategy → scan → deliver the collection. Startup failures (no usable
//! client, unresolvable channel, a strategy the session cannot perform) are
//! logged as critical and abort the run before any scanning starts.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use tracing::{error, info};

use crate::config::{Config, ScanConfig};
use crate::documents::DocumentStore;
use crate::export;
use crate::journal::Journal;
use crate::models::{EntityHandle, ScanBound};
use crate::platform::{self, ClientMode, PlatformClient};
use crate::platform_memory::MemoryPlatform;
use crate::scan::{NaiveOptions, ScanOutcome, Scanner};
use crate::sink::{LiveMode, RecordSink};

/// Which scan to run.
#[derive(Debug, Clone, PartialEq)]
pub enum Strategy {
    /// Join and stream the channel; needs a user session.
    Cursor { bound: ScanBound, download: bool },
    /// Fetch id windows starting at `offset`; always downloads documents.
    /// Without an explicit `journal`, a unique per-run file is used.
    Naive {
        offset: i64,
        journal: Option<PathBuf>,
    },
}

/// An archive replayed in place of a live platform session.
#[derive(Debug, Clone, PartialEq)]
pub struct Replay {
    /// JSON-lines file of archived messages.
    pub archive: PathBuf,
    /// Directory of media files named by message id.
    pub media_dir: Option<PathBuf>,
}

/// The result of a completed run.
#[derive(Debug)]
pub struct PipelineRun {
    pub handle: EntityHandle,
    pub outcome: ScanOutcome,
    pub journal: Option<PathBuf>,
}

pub struct Pipeline {
    client: Arc<dyn PlatformClient>,
    store: DocumentStore,
    sink: Box<dyn RecordSink>,
    scan: ScanConfig,
}

impl Pipeline {
    pub fn new(
        client: Arc<dyn PlatformClient>,
        config: &Config,
        sink: Box<dyn RecordSink>,
    ) -> Result<Self> {
        let store = DocumentStore::open(
            &config.documents.download_path,
            &config.documents.excluded_mime_types,
        )?;
        Ok(Self {
            client,
            store,
            sink,
            scan: config.scan.clone(),
        })
    }

    /// Resolve the target channel. Failure is fatal to the run.
    pub async fn resolve(&self, identifier: &str) -> Result<EntityHandle> {
        match self.client.resolve_entity(identifier).await {
            Ok(handle) => {
                info!(identifier, channel = handle.id, "created handle to channel");
                Ok(handle)
            }
            Err(err) => {
                error!(critical = true, identifier, error = %err, "failed to create handle to channel");
                Err(anyhow!(err).context(format!("Failed to resolve '{}'", identifier)))
            }
        }
    }

    pub async fn run(&self, identifier: &str, strategy: Strategy) -> Result<PipelineRun> {
        if matches!(strategy, Strategy::Cursor { .. }) && self.client.mode() == ClientMode::Bot {
            error!(
                critical = true,
                identifier, "cursor scans need a user session; bot sessions must use the naive scan"
            );
            bail!("Cursor scans are not available to a bot session; use scan-naive");
        }

        let handle = self.resolve(identifier).await?;
        let scanner = Scanner::new(self.client.as_ref(), &self.store, self.sink.as_ref());

        match strategy {
            Strategy::Cursor { bound, download } => {
                let outcome = scanner.scan_channel(&handle, bound, download).await;
                Ok(PipelineRun {
                    handle,
                    outcome,
                    journal: None,
                })
            }
            Strategy::Naive { offset, journal } => {
                let mut journal = match journal {
                    Some(path) => Journal::open(&path).await?,
                    None => Journal::per_run(&self.scan.crash_log_dir).await?,
                };
                let options = NaiveOptions::from_config(&self.scan, offset);
                let outcome = scanner.scan_naive(&handle, options, &mut journal).await;
                Ok(PipelineRun {
                    handle,
                    outcome,
                    journal: Some(journal.path().to_path_buf()),
                })
            }
        }
    }
}

/// CLI entry point for `chx scan` and `chx scan-naive`.
pub async fn run_scan(
    config: &Config,
    identifier: &str,
    strategy: Strategy,
    live: LiveMode,
    output: Option<&Path>,
    replay: Option<&Replay>,
) -> Result<()> {
    let client = match replay {
        Some(replay) => open_replay(config, identifier, replay)?,
        None => connect_or_log(config).await?,
    };
    let pipeline = Pipeline::new(client, config, live.sink())?;
    let run = pipeline.run(identifier, strategy).await?;
    let report = &run.outcome.report;

    export::write_records(&run.outcome.records, output)?;

    eprintln!("scan {} ({})", run.handle.id, report.strategy);
    eprintln!("  messages: {}", report.messages);
    eprintln!("  documents downloaded: {}", report.downloaded);
    eprintln!("  documents already stored: {}", report.already_stored);
    eprintln!("  documents excluded: {}", report.excluded);
    eprintln!("  download failures: {}", report.download_failures);
    if report.strategy == "naive" {
        eprintln!("  windows scanned: {}", report.windows);
    }
    if let Some(journal) = &run.journal {
        eprintln!("  journal: {}", journal.display());
    }

    if let Some(reason) = &report.aborted {
        bail!("Scan aborted: {}", reason);
    }
    eprintln!("ok");
    Ok(())
}

/// CLI entry point for `chx resolve`.
pub async fn run_resolve(config: &Config, identifier: &str) -> Result<()> {
    let client = connect_or_log(config).await?;
    let handle = match client.resolve_entity(identifier).await {
        Ok(handle) => handle,
        Err(err) => {
            error!(identifier, error = %err, "failed to create handle to entity");
            return Err(anyhow!(err).context(format!("Failed to resolve '{}'", identifier)));
        }
    };
    println!("{}", serde_json::to_string_pretty(&handle)?);
    Ok(())
}

fn open_replay(
    config: &Config,
    identifier: &str,
    replay: &Replay,
) -> Result<Arc<dyn PlatformClient>> {
    let mode = if config.telegram.is_bot() {
        ClientMode::Bot
    } else {
        ClientMode::User
    };
    let platform =
        MemoryPlatform::replay(mode, identifier, &replay.archive, replay.media_dir.as_deref())
            .map_err(|err| {
                error!(critical = true, error = %format!("{:#}", err), "failed to open archive");
                err
            })?;
    info!(%mode, archive = %replay.archive.display(), "replaying archive");
    Ok(Arc::new(platform))
}

async fn connect_or_log(config: &Config) -> Result<Arc<dyn PlatformClient>> {
    platform::connect(config).await.map_err(|err| {
        error!(critical = true, error = %format!("{:#}", err), "failed to create platform client");
        err
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DocumentsConfig, TelegramConfig};
    use crate::models::{EntityKind, RawMessage};
    use crate::sink::NoSink;
    use chrono::{TimeZone, Utc};
    use serde_json::Map;
    use tempfile::TempDir;

    fn config(root: &Path) -> Config {
        Config {
            telegram: TelegramConfig {
                api_id: 1,
                api_hash: "hash".to_string(),
                bot_token: None,
                gateway_url: "http://127.0.0.1:9".to_string(),
                timeout_secs: 1,
                page_size: 100,
            },
            documents: DocumentsConfig {
                download_path: root.join("docs"),
                excluded_mime_types: Vec::new(),
            },
            scan: ScanConfig {
                window_size: 100,
                empty_window_limit: 4,
                crash_log_dir: root.join("journal"),
            },
        }
    }

    fn channel() -> EntityHandle {
        EntityHandle {
            id: -1001,
            kind: EntityKind::Channel,
            title: None,
            username: Some("news".to_string()),
            access_hash: None,
        }
    }

    fn message(id: i64) -> RawMessage {
        RawMessage {
            id,
            chat_id: -1001,
            date: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
            sender_id: None,
            text: Some("hi".to_string()),
            media: None,
            reply_to_msg_id: None,
            extra: Map::new(),
        }
    }

    #[tokio::test]
    async fn test_unresolvable_channel_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let platform = Arc::new(MemoryPlatform::new(ClientMode::User));
        let pipeline = Pipeline::new(platform, &config(tmp.path()), Box::new(NoSink)).unwrap();

        let result = pipeline
            .run(
                "missing",
                Strategy::Cursor {
                    bound: ScanBound::Unbounded,
                    download: false,
                },
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_bot_session_rejects_cursor_scan() {
        let tmp = TempDir::new().unwrap();
        let platform = Arc::new(
            MemoryPlatform::new(ClientMode::Bot)
                .with_entity("news", channel())
                .with_messages(-1001, vec![message(1)]),
        );
        let pipeline = Pipeline::new(platform, &config(tmp.path()), Box::new(NoSink)).unwrap();

        let cursor = Strategy::Cursor {
            bound: ScanBound::Unbounded,
            download: true,
        };
        assert!(pipeline.run("news", cursor).await.is_err());

        let naive = Strategy::Naive {
            offset: 1,
            journal: None,
        };
        let run = pipeline.run("news", naive).await.unwrap();
        assert_eq!(run.outcome.records.len(), 1);
        let journal = run.journal.unwrap();
        assert!(journal.starts_with(tmp.path().join("journal")));
    }
}
