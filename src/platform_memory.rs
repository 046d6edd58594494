//! In-memory platform.
//!
//! A deterministic [`PlatformClient`] backed by plain maps. It honors the
//! same ordering and bound rules as a live session, so scans behave
//! identically against it. Channels can be filled by hand or replayed from a
//! JSON-lines archive of [`RawMessage`]s (`chx scan --archive`).

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use crate::error::PlatformError;
use crate::models::{EntityHandle, EntityKind, RawMessage, ScanBound};
use crate::platform::{ClientMode, MessageStream, PlatformClient};

#[derive(Default)]
pub struct MemoryPlatform {
    mode: ClientMode,
    entities: HashMap<String, EntityHandle>,
    denied: HashSet<i64>,
    channels: HashMap<i64, Vec<RawMessage>>,
    media: HashMap<(i64, i64), Vec<u8>>,
    failing_media: HashSet<(i64, i64)>,
    lookups: AtomicUsize,
    downloads: AtomicUsize,
}

impl MemoryPlatform {
    pub fn new(mode: ClientMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    /// Register an entity under an identifier. The handle's numeric id is
    /// registered as an identifier too.
    pub fn with_entity(mut self, identifier: &str, handle: EntityHandle) -> Self {
        self.entities.insert(handle.id.to_string(), handle.clone());
        self.entities
            .insert(identifier.trim_start_matches('@').to_string(), handle);
        self
    }

    /// Append messages to a channel. `chat_id` is set on each message.
    pub fn with_messages(mut self, channel_id: i64, messages: Vec<RawMessage>) -> Self {
        let channel = self.channels.entry(channel_id).or_default();
        for mut message in messages {
            message.chat_id = channel_id;
            channel.push(message);
        }
        self
    }

    /// Attach downloadable bytes to a message.
    pub fn with_media(mut self, channel_id: i64, message_id: i64, bytes: Vec<u8>) -> Self {
        self.media.insert((channel_id, message_id), bytes);
        self
    }

    /// Make the download of a message's media fail.
    pub fn with_failing_media(mut self, channel_id: i64, message_id: i64) -> Self {
        self.failing_media.insert((channel_id, message_id));
        self
    }

    /// Refuse membership of a channel.
    pub fn deny_join(mut self, channel_id: i64) -> Self {
        self.denied.insert(channel_id);
        self
    }

    /// Build a session that replays a JSON-lines archive (one [`RawMessage`]
    /// per line) as the channel `identifier`.
    ///
    /// The channel id is `identifier` when it is numeric, otherwise the
    /// `chat_id` of the first archived message that has one. When
    /// `media_dir` is given, a file named after a message id holds that
    /// message's media bytes; messages without such a file fail to download.
    pub fn replay(
        mode: ClientMode,
        identifier: &str,
        archive: &Path,
        media_dir: Option<&Path>,
    ) -> Result<Self> {
        let messages = read_archive(archive)?;
        let key = identifier.trim_start_matches('@');
        let (channel_id, username) = match key.parse::<i64>() {
            Ok(id) => (id, None),
            Err(_) => (
                messages
                    .iter()
                    .map(|m| m.chat_id)
                    .find(|id| *id != 0)
                    .unwrap_or_default(),
                Some(key.to_string()),
            ),
        };
        let handle = EntityHandle {
            id: channel_id,
            kind: EntityKind::Channel,
            title: None,
            username,
            access_hash: None,
        };

        let ids: Vec<i64> = messages.iter().map(|m| m.id).collect();
        let mut platform = Self::new(mode)
            .with_entity(key, handle)
            .with_messages(channel_id, messages);

        if let Some(dir) = media_dir {
            for id in ids {
                let path = dir.join(id.to_string());
                if path.is_file() {
                    let bytes = std::fs::read(&path)
                        .with_context(|| format!("Failed to read media: {}", path.display()))?;
                    platform = platform.with_media(channel_id, id, bytes);
                }
            }
        }
        Ok(platform)
    }

    /// Number of `get_messages_by_ids` calls served.
    pub fn lookup_calls(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    /// Number of `download_media` calls served, failed ones included.
    pub fn download_calls(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    fn ordered(&self, channel_id: i64, bound: ScanBound) -> Vec<RawMessage> {
        let mut messages: Vec<RawMessage> = self
            .channels
            .get(&channel_id)
            .map(|all| all.iter().filter(|m| bound.admits(m)).cloned().collect())
            .unwrap_or_default();

        match bound {
            ScanBound::NewerThan(_) => messages.sort_by_key(|m| (m.date, m.id)),
            ScanBound::OlderThan(_) => {
                messages.sort_by(|a, b| (b.date, b.id).cmp(&(a.date, a.id)))
            }
            ScanBound::Unbounded | ScanBound::MaxId(_) => messages.sort_by(|a, b| b.id.cmp(&a.id)),
        }
        messages
    }

    fn require_user(&self, operation: &'static str) -> Result<(), PlatformError> {
        match self.mode {
            ClientMode::User => Ok(()),
            ClientMode::Bot => Err(PlatformError::Unsupported {
                operation,
                mode: self.mode.as_str(),
            }),
        }
    }
}

fn read_archive(path: &Path) -> Result<Vec<RawMessage>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read archive: {}", path.display()))?;
    let mut messages = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let message: RawMessage = serde_json::from_str(line).with_context(|| {
            format!("Invalid message on line {} of {}", line_no + 1, path.display())
        })?;
        messages.push(message);
    }
    Ok(messages)
}

#[async_trait]
impl PlatformClient for MemoryPlatform {
    fn mode(&self) -> ClientMode {
        self.mode
    }

    async fn resolve_entity(&self, identifier: &str) -> Result<EntityHandle, PlatformError> {
        let key = identifier.trim_start_matches('@');
        self.entities
            .get(key)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound(key.to_string()))
    }

    async fn join_channel(&self, handle: &EntityHandle) -> Result<(), PlatformError> {
        self.require_user("join_channel")?;
        if self.denied.contains(&handle.id) {
            return Err(PlatformError::AccessDenied(handle.id.to_string()));
        }
        Ok(())
    }

    fn stream_messages<'a>(
        &'a self,
        handle: &'a EntityHandle,
        bound: ScanBound,
    ) -> MessageStream<'a> {
        if let Err(err) = self.require_user("stream_messages") {
            return stream::once(async move { Err(err) }).boxed();
        }
        stream::iter(self.ordered(handle.id, bound).into_iter().map(Ok)).boxed()
    }

    async fn get_messages_by_ids(
        &self,
        handle: &EntityHandle,
        ids: &[i64],
    ) -> Result<Vec<Option<RawMessage>>, PlatformError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let channel = self.channels.get(&handle.id);
        Ok(ids
            .iter()
            .map(|id| channel.and_then(|all| all.iter().find(|m| m.id == *id).cloned()))
            .collect())
    }

    async fn download_media(&self, message: &RawMessage) -> Result<Vec<u8>, PlatformError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        let key = (message.chat_id, message.id);
        if self.failing_media.contains(&key) {
            return Err(PlatformError::Transport(format!(
                "download of {}/{} interrupted",
                message.chat_id, message.id
            )));
        }
        self.media.get(&key).cloned().ok_or_else(|| {
            PlatformError::NotFound(format!("media {}/{}", message.chat_id, message.id))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::Map;

    fn channel() -> EntityHandle {
        EntityHandle {
            id: -1001,
            kind: EntityKind::Channel,
            title: Some("News".to_string()),
            username: Some("news".to_string()),
            access_hash: None,
        }
    }

    fn messages(n: i64) -> Vec<RawMessage> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (1..=n)
            .map(|id| RawMessage {
                id,
                chat_id: 0,
                date: start + Duration::hours(id),
                sender_id: None,
                text: Some(format!("post {}", id)),
                media: None,
                reply_to_msg_id: None,
                extra: Map::new(),
            })
            .collect()
    }

    async fn collect(platform: &MemoryPlatform, bound: ScanBound) -> Vec<i64> {
        let handle = channel();
        platform
            .stream_messages(&handle, bound)
            .map(|m| m.unwrap().id)
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_stream_orders_follow_bound() {
        let platform = MemoryPlatform::new(ClientMode::User).with_messages(-1001, messages(5));
        let t3 = Utc.with_ymd_and_hms(2024, 1, 1, 3, 0, 0).unwrap();

        assert_eq!(collect(&platform, ScanBound::Unbounded).await, vec![5, 4, 3, 2, 1]);
        assert_eq!(collect(&platform, ScanBound::MaxId(3)).await, vec![3, 2, 1]);
        assert_eq!(collect(&platform, ScanBound::NewerThan(t3)).await, vec![3, 4, 5]);
        assert_eq!(collect(&platform, ScanBound::OlderThan(t3)).await, vec![2, 1]);
    }

    #[tokio::test]
    async fn test_lookup_preserves_slots() {
        let platform = MemoryPlatform::new(ClientMode::Bot).with_messages(-1001, messages(3));
        let found = platform
            .get_messages_by_ids(&channel(), &[2, 9, 3])
            .await
            .unwrap();
        assert_eq!(found.len(), 3);
        assert_eq!(found[0].as_ref().map(|m| m.id), Some(2));
        assert!(found[1].is_none());
        assert_eq!(found[2].as_ref().map(|m| m.chat_id), Some(-1001));
    }

    #[tokio::test]
    async fn test_bot_cannot_stream() {
        let platform = MemoryPlatform::new(ClientMode::Bot).with_messages(-1001, messages(3));
        let handle = channel();
        let first = platform
            .stream_messages(&handle, ScanBound::Unbounded)
            .next()
            .await
            .unwrap();
        assert!(matches!(first, Err(PlatformError::Unsupported { .. })));
    }

    #[tokio::test]
    async fn test_resolve_by_name_or_id() {
        let platform = MemoryPlatform::new(ClientMode::User).with_entity("news", channel());
        assert_eq!(platform.resolve_entity("@news").await.unwrap().id, -1001);
        assert_eq!(platform.resolve_entity("-1001").await.unwrap().id, -1001);
        assert!(matches!(
            platform.resolve_entity("nobody").await,
            Err(PlatformError::NotFound(_))
        ));
    }

    fn write_archive(dir: &Path, messages: &[RawMessage]) -> std::path::PathBuf {
        let path = dir.join("archive.jsonl");
        let lines: Vec<String> = messages
            .iter()
            .map(|m| serde_json::to_string(m).unwrap())
            .collect();
        std::fs::write(&path, lines.join("\n") + "\n").unwrap();
        path
    }

    #[tokio::test]
    async fn test_replay_numeric_identifier() {
        let tmp = tempfile::TempDir::new().unwrap();
        let archive = write_archive(tmp.path(), &messages(2));
        let media = tmp.path().join("media");
        std::fs::create_dir_all(&media).unwrap();
        std::fs::write(media.join("2"), b"bytes of 2").unwrap();

        let platform =
            MemoryPlatform::replay(ClientMode::User, "-1001", &archive, Some(&media)).unwrap();
        let handle = platform.resolve_entity("-1001").await.unwrap();
        assert_eq!(handle.id, -1001);
        assert_eq!(platform.ordered(-1001, ScanBound::Unbounded).len(), 2);

        let found = platform.get_messages_by_ids(&handle, &[1, 2]).await.unwrap();
        let second = found[1].clone().unwrap();
        assert_eq!(platform.download_media(&second).await.unwrap(), b"bytes of 2");
        let first = found[0].clone().unwrap();
        assert!(platform.download_media(&first).await.is_err());
    }

    #[tokio::test]
    async fn test_replay_username_takes_archived_chat_id() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut archived = messages(1);
        archived[0].chat_id = -1777;
        let archive = write_archive(tmp.path(), &archived);

        let platform = MemoryPlatform::replay(ClientMode::User, "@news", &archive, None).unwrap();
        let handle = platform.resolve_entity("news").await.unwrap();
        assert_eq!(handle.id, -1777);
        assert_eq!(handle.username.as_deref(), Some("news"));
    }

    #[test]
    fn test_replay_rejects_bad_line() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("archive.jsonl");
        std::fs::write(&path, "{\"id\": 1}\n").unwrap();
        let err = MemoryPlatform::replay(ClientMode::User, "1", &path, None)
            .err()
            .unwrap();
        assert!(format!("{:#}", err).contains("line 1"));
    }
}
