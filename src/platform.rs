//! The messaging-platform capability surface.
//!
//! The ingestion pipeline never talks to the network directly. Everything it
//! needs from the platform (entity resolution, channel membership, message
//! iteration, id lookup, and media download) goes through [`PlatformClient`].
//! A client is an explicit session object: it is constructed once by
//! [`connect`] and handed to the scanner, enricher, and document store.
//!
//! # Implementations
//!
//! | Type | Use |
//! |------|-----|
//! | [`GatewayClient`](crate::platform_gateway::GatewayClient) | JSON-over-HTTP Telegram gateway |
//! | [`MemoryPlatform`](crate::platform_memory::MemoryPlatform) | Deterministic in-memory channels (fixtures, replay) |
//!
//! # Example
//!
//! ```rust
//! use channel_harness::models::{EntityHandle, EntityKind, ScanBound};
//! use channel_harness::platform::{ClientMode, PlatformClient};
//! use channel_harness::platform_memory::MemoryPlatform;
//! use futures::StreamExt;
//!
//! # #[tokio::main] async fn main() {
//! let channel = EntityHandle {
//!     id: -1001,
//!     kind: EntityKind::Channel,
//!     title: None,
//!     username: Some("news".to_string()),
//!     access_hash: None,
//! };
//! let platform = MemoryPlatform::new(ClientMode::User).with_entity("news", channel.clone());
//!
//! let handle = platform.resolve_entity("news").await.unwrap();
//! let mut stream = platform.stream_messages(&handle, ScanBound::Unbounded);
//! assert!(stream.next().await.is_none());
//! # }
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use tracing::info;

use crate::config::Config;
use crate::error::PlatformError;
use crate::models::{EntityHandle, RawMessage, ScanBound};
use crate::platform_gateway::GatewayClient;

/// A lazy, finite, non-restartable sequence of messages.
pub type MessageStream<'a> = BoxStream<'a, Result<RawMessage, PlatformError>>;

/// Which kind of platform session the client holds.
///
/// User sessions can join channels and stream their history. Bot sessions
/// cannot join arbitrary channels but can look messages up by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientMode {
    #[default]
    User,
    Bot,
}

impl ClientMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientMode::User => "user",
            ClientMode::Bot => "bot",
        }
    }
}

impl std::fmt::Display for ClientMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// The session kind this client was authenticated as.
    fn mode(&self) -> ClientMode;

    /// Resolve an identifier (numeric id or `@handle` without the `@`) into
    /// a handle. Unknown identifiers fail with [`PlatformError::NotFound`].
    async fn resolve_entity(&self, identifier: &str) -> Result<EntityHandle, PlatformError>;

    /// Ensure the session is a member of the channel.
    ///
    /// Fails with [`PlatformError::AccessDenied`] when the channel cannot be
    /// joined or read.
    async fn join_channel(&self, handle: &EntityHandle) -> Result<(), PlatformError>;

    /// Stream a channel's messages under a single bound.
    ///
    /// Ordering follows the bound: newest first for [`ScanBound::Unbounded`],
    /// [`ScanBound::MaxId`] and [`ScanBound::OlderThan`]; oldest first for
    /// [`ScanBound::NewerThan`].
    fn stream_messages<'a>(&'a self, handle: &'a EntityHandle, bound: ScanBound)
        -> MessageStream<'a>;

    /// Look messages up by id. The result has the same length and order as
    /// `ids`; ids without a message map to `None`.
    async fn get_messages_by_ids(
        &self,
        handle: &EntityHandle,
        ids: &[i64],
    ) -> Result<Vec<Option<RawMessage>>, PlatformError>;

    /// Download the full content of the message's media.
    async fn download_media(&self, message: &RawMessage) -> Result<Vec<u8>, PlatformError>;
}

/// Construct and authenticate the platform session described by the config.
///
/// A configured bot token selects a bot session; otherwise a user session is
/// opened with the API id and hash. Any failure here is fatal to the run.
pub async fn connect(config: &Config) -> Result<Arc<dyn PlatformClient>> {
    let client = GatewayClient::new(&config.telegram)?;
    client.authenticate().await.with_context(|| {
        format!(
            "Failed to authenticate {} session against {}",
            client.mode(),
            config.telegram.gateway_url
        )
    })?;
    info!(mode = %client.mode(), gateway = %config.telegram.gateway_url, "platform client connected");
    Ok(Arc::new(client))
}
