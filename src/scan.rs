//! Channel scanning strategies.
//!
//! Two interchangeable ways to enumerate a channel and drive per-message
//! processing:
//!
//! - **Cursor scan** ([`Scanner::scan_channel`]): joins the channel and
//!   streams its history under one [`ScanBound`]. Each message optionally
//!   goes through the [`DocumentStore`], is always enriched, and is
//!   appended to the result. Records that carry a download are also emitted
//!   to the live [`RecordSink`] immediately. Needs a user session.
//!
//! - **Naive scan** ([`Scanner::scan_naive`]): the degraded fallback for bot
//!   sessions, which cannot join or stream but can look messages up by id.
//!   Fetches fixed windows of ids, `[offset, offset + window_size - 1]`,
//!   advancing by `window_size` after every window whether or not it had
//!   hits. Every message found goes through the store and is appended to the
//!   crash [`Journal`]. No enrichment is done.
//!
//! # Naive termination
//!
//! The scan stops after `empty_window_limit` consecutive windows with no
//! messages (4 by default, i.e. 400 ids). This is a heuristic for the end of
//! a channel: a real gap of that many deleted ids ends the scan early, and
//! the messages after the gap are not collected.
//!
//! # Failures
//!
//! Platform errors that concern one message (a failed download, a mention
//! that does not resolve) are logged and the scan continues. A refused join,
//! a broken stream, a failed id lookup, or a local write error aborts the
//! scan: it is logged as critical and the records gathered so far are
//! returned with [`ScanReport::aborted`] set.

use futures::StreamExt;
use tracing::{debug, error, info};

use crate::config::ScanConfig;
use crate::documents::{DocumentStore, StoreOutcome};
use crate::enrich::enrich_message;
use crate::journal::Journal;
use crate::models::{EntityHandle, Enrichments, MessageRecord, ScanBound};
use crate::platform::PlatformClient;
use crate::sink::RecordSink;

/// Counters for one scan run.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ScanReport {
    pub channel_id: i64,
    pub strategy: &'static str,
    pub messages: u64,
    pub downloaded: u64,
    pub already_stored: u64,
    pub excluded: u64,
    pub download_failures: u64,
    /// Id windows fetched (naive scans only).
    pub windows: u64,
    pub aborted: Option<String>,
}

impl ScanReport {
    fn new(channel_id: i64, strategy: &'static str) -> Self {
        Self {
            channel_id,
            strategy,
            ..Default::default()
        }
    }

    fn count(&mut self, outcome: &StoreOutcome) {
        match outcome {
            StoreOutcome::Stored(_) => self.downloaded += 1,
            StoreOutcome::AlreadyStored(_) => self.already_stored += 1,
            StoreOutcome::Excluded(_) => self.excluded += 1,
            StoreOutcome::Failed => self.download_failures += 1,
            StoreOutcome::NotDocument => {}
        }
    }

    fn abort(&mut self, channel_id: i64, reason: String) {
        error!(critical = true, channel = channel_id, reason = %reason, "scan aborted");
        self.aborted = Some(reason);
    }
}

/// Records collected by a scan, in the order the platform yielded them.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub records: Vec<MessageRecord>,
    pub report: ScanReport,
}

/// Window parameters for a naive scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NaiveOptions {
    /// First message id fetched.
    pub offset: i64,
    pub window_size: i64,
    pub empty_window_limit: u32,
}

impl Default for NaiveOptions {
    fn default() -> Self {
        Self {
            offset: 1,
            window_size: 100,
            empty_window_limit: 4,
        }
    }
}

impl NaiveOptions {
    pub fn from_config(config: &ScanConfig, offset: i64) -> Self {
        Self {
            offset,
            window_size: config.window_size,
            empty_window_limit: config.empty_window_limit,
        }
    }
}

/// Drives a scan against one platform session.
pub struct Scanner<'a> {
    client: &'a dyn PlatformClient,
    store: &'a DocumentStore,
    sink: &'a dyn RecordSink,
}

impl<'a> Scanner<'a> {
    pub fn new(
        client: &'a dyn PlatformClient,
        store: &'a DocumentStore,
        sink: &'a dyn RecordSink,
    ) -> Self {
        Self {
            client,
            store,
            sink,
        }
    }

    /// Cursor-based scan of a channel's history.
    pub async fn scan_channel(
        &self,
        handle: &EntityHandle,
        bound: ScanBound,
        download: bool,
    ) -> ScanOutcome {
        let mut report = ScanReport::new(handle.id, "cursor");
        let mut records = Vec::new();

        if let Err(err) = self.client.join_channel(handle).await {
            report.abort(
                handle.id,
                format!("unable to access or join channel {}: {}", handle.id, err),
            );
            return ScanOutcome { records, report };
        }

        info!(channel = handle.id, %bound, download, "starting iteration of channel messages");

        let mut stream = self.client.stream_messages(handle, bound);
        while let Some(item) = stream.next().await {
            let message = match item {
                Ok(message) => message,
                Err(err) => {
                    report.abort(handle.id, format!("message stream failed: {}", err));
                    break;
                }
            };
            report.messages += 1;

            let download_record = if download {
                match self.store.store(self.client, &message).await {
                    Ok(outcome) => {
                        report.count(&outcome);
                        outcome.into_record()
                    }
                    Err(err) => {
                        report.abort(handle.id, format!("{:#}", err));
                        break;
                    }
                }
            } else {
                None
            };

            let enrichments = enrich_message(self.client, &message).await;
            let record = MessageRecord::new(&message, enrichments, download_record);
            if record.download_record.is_some() {
                self.sink.emit(&record);
            }
            records.push(record);
        }

        info!(
            channel = handle.id,
            obtained = records.len(),
            downloaded = report.downloaded,
            "completed iteration of channel messages"
        );
        ScanOutcome { records, report }
    }

    /// Naive id-window scan for sessions that cannot stream history.
    pub async fn scan_naive(
        &self,
        handle: &EntityHandle,
        options: NaiveOptions,
        journal: &mut Journal,
    ) -> ScanOutcome {
        let mut report = ScanReport::new(handle.id, "naive");
        let mut records = Vec::new();
        let mut offset = options.offset;
        let mut consecutive_empty: u32 = 0;

        info!(
            channel = handle.id,
            offset,
            window = options.window_size,
            journal = %journal.path().display(),
            "starting naive iteration of channel messages"
        );

        'windows: loop {
            let window_start = offset;
            let window_end = offset.saturating_add(options.window_size);
            let ids: Vec<i64> = (window_start..window_end).collect();
            let batch = match self.client.get_messages_by_ids(handle, &ids).await {
                Ok(batch) => batch,
                Err(err) => {
                    report.abort(
                        handle.id,
                        format!(
                            "lookup of ids {}..{} failed: {}",
                            window_start, window_end, err
                        ),
                    );
                    break;
                }
            };
            offset = window_end;
            report.windows += 1;

            let mut hits = 0usize;
            for message in batch.into_iter().flatten() {
                hits += 1;
                report.messages += 1;

                let outcome = match self.store.store(self.client, &message).await {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        report.abort(handle.id, format!("{:#}", err));
                        break 'windows;
                    }
                };
                report.count(&outcome);

                let record =
                    MessageRecord::new(&message, Enrichments::default(), outcome.into_record());
                if let Err(err) = journal.append(&record).await {
                    report.abort(handle.id, format!("{:#}", err));
                    break 'windows;
                }
                records.push(record);
            }

            debug!(
                channel = handle.id,
                window_start,
                hits,
                missing = ids.len() - hits,
                "fetched id window"
            );

            if hits == 0 {
                consecutive_empty += 1;
            } else {
                consecutive_empty = 0;
            }
            if consecutive_empty >= options.empty_window_limit {
                break;
            }
            if window_end == i64::MAX {
                info!(channel = handle.id, "reached the end of the message id space");
                break;
            }
        }

        info!(
            channel = handle.id,
            collected = records.len(),
            windows = report.windows,
            "finished naive iteration of channel messages"
        );
        ScanOutcome { records, report }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityKind, RawMessage};
    use crate::platform::ClientMode;
    use crate::platform_memory::MemoryPlatform;
    use crate::sink::NoSink;
    use chrono::{TimeZone, Utc};
    use serde_json::{json, Map};
    use tempfile::TempDir;

    const CHANNEL: i64 = -1001;

    fn channel() -> EntityHandle {
        EntityHandle {
            id: CHANNEL,
            kind: EntityKind::Channel,
            title: None,
            username: None,
            access_hash: None,
        }
    }

    fn message(id: i64) -> RawMessage {
        RawMessage {
            id,
            chat_id: CHANNEL,
            date: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                + chrono::Duration::minutes(id),
            sender_id: None,
            text: Some(format!("post {}", id)),
            media: None,
            reply_to_msg_id: None,
            extra: Map::new(),
        }
    }

    fn pdf(id: i64) -> RawMessage {
        let mut msg = message(id);
        msg.media = Some(json!({
            "kind": "document",
            "document_id": id,
            "mime_type": "application/pdf",
        }));
        msg
    }

    #[tokio::test]
    async fn test_naive_stops_after_four_empty_windows() {
        let tmp = TempDir::new().unwrap();
        let store = DocumentStore::open(&tmp.path().join("docs"), &[]).unwrap();
        let platform = MemoryPlatform::new(ClientMode::Bot)
            .with_messages(CHANNEL, vec![message(5), message(150)]);
        let mut journal = Journal::per_run(tmp.path()).await.unwrap();

        let outcome = Scanner::new(&platform, &store, &NoSink)
            .scan_naive(&channel(), NaiveOptions::default(), &mut journal)
            .await;

        // windows 1-100 and 101-200 hit, then 4 empty windows
        assert_eq!(outcome.report.windows, 6);
        assert_eq!(platform.lookup_calls(), 6);
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(journal.written(), 2);
        assert!(outcome.report.aborted.is_none());
    }

    #[tokio::test]
    async fn test_naive_gap_resets_empty_counter() {
        let tmp = TempDir::new().unwrap();
        let store = DocumentStore::open(&tmp.path().join("docs"), &[]).unwrap();
        // ids 1 and 350: only two empty windows lie between them
        let platform = MemoryPlatform::new(ClientMode::Bot)
            .with_messages(CHANNEL, vec![message(1), message(350)]);
        let mut journal = Journal::per_run(tmp.path()).await.unwrap();

        let outcome = Scanner::new(&platform, &store, &NoSink)
            .scan_naive(&channel(), NaiveOptions::default(), &mut journal)
            .await;

        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.report.windows, 8);
    }

    #[tokio::test]
    async fn test_naive_downloads_without_enrichment() {
        let tmp = TempDir::new().unwrap();
        let store = DocumentStore::open(&tmp.path().join("docs"), &[]).unwrap();
        let mut mention = pdf(2);
        mention.text = Some("from @someone".to_string());
        let platform = MemoryPlatform::new(ClientMode::Bot)
            .with_messages(CHANNEL, vec![mention])
            .with_media(CHANNEL, 2, b"%PDF-1.4".to_vec());
        let mut journal = Journal::per_run(tmp.path()).await.unwrap();

        let outcome = Scanner::new(&platform, &store, &NoSink)
            .scan_naive(&channel(), NaiveOptions::default(), &mut journal)
            .await;

        let record = &outcome.records[0];
        assert!(record.enrichments.is_empty());
        assert!(record.download_record.is_some());
        assert_eq!(outcome.report.downloaded, 1);
    }

    #[tokio::test]
    async fn test_cursor_join_failure_returns_empty() {
        let tmp = TempDir::new().unwrap();
        let store = DocumentStore::open(tmp.path(), &[]).unwrap();
        let platform = MemoryPlatform::new(ClientMode::User)
            .with_messages(CHANNEL, vec![message(1)])
            .deny_join(CHANNEL);

        let outcome = Scanner::new(&platform, &store, &NoSink)
            .scan_channel(&channel(), ScanBound::Unbounded, true)
            .await;
        assert!(outcome.records.is_empty());
        assert!(outcome.report.aborted.is_some());
    }

    #[tokio::test]
    async fn test_cursor_without_download_skips_store() {
        let tmp = TempDir::new().unwrap();
        let store = DocumentStore::open(tmp.path(), &[]).unwrap();
        let platform = MemoryPlatform::new(ClientMode::User)
            .with_messages(CHANNEL, vec![pdf(1)])
            .with_media(CHANNEL, 1, b"bytes".to_vec());

        let outcome = Scanner::new(&platform, &store, &NoSink)
            .scan_channel(&channel(), ScanBound::Unbounded, false)
            .await;
        assert_eq!(outcome.records.len(), 1);
        assert!(outcome.records[0].download_record.is_none());
        assert_eq!(platform.download_calls(), 0);
    }

    #[tokio::test]
    async fn test_naive_stops_at_end_of_id_space() {
        let tmp = TempDir::new().unwrap();
        let store = DocumentStore::open(&tmp.path().join("docs"), &[]).unwrap();
        let mut last = message(1);
        last.id = i64::MAX - 10;
        let platform = MemoryPlatform::new(ClientMode::Bot).with_messages(CHANNEL, vec![last]);
        let mut journal = Journal::per_run(tmp.path()).await.unwrap();

        let options = NaiveOptions {
            offset: i64::MAX - 50,
            ..NaiveOptions::default()
        };
        let outcome = Scanner::new(&platform, &store, &NoSink)
            .scan_naive(&channel(), options, &mut journal)
            .await;

        assert_eq!(platform.lookup_calls(), 1);
        assert_eq!(outcome.report.windows, 1);
        assert_eq!(outcome.records.len(), 1);
        assert!(outcome.report.aborted.is_none());
    }
}
