//! Telegram gateway client.
//!
//! Implements [`PlatformClient`] over a small JSON/HTTP gateway that fronts a
//! Telegram session (MTProto for user sessions, the Bot API for bot
//! sessions). Credentials travel as request headers on every call.
//!
//! The gateway is an external service this crate does not provide. Telegram
//! itself does not speak this protocol: the endpoints below are the contract
//! a gateway deployment must implement, and pointing `gateway_url` at a
//! Telegram server will not work. For offline runs use an archive replay
//! ([`MemoryPlatform::replay`](crate::platform_memory::MemoryPlatform::replay)).
//!
//! # Endpoints
//!
//! | Method | Path | Purpose |
//! |--------|------|---------|
//! | `POST` | `/v1/session` | Authenticate the session |
//! | `GET` | `/v1/entities/{identifier}` | Resolve an entity |
//! | `POST` | `/v1/channels/{id}/join` | Join a channel |
//! | `GET` | `/v1/channels/{id}/messages` | One page of history |
//! | `POST` | `/v1/channels/{id}/messages/lookup` | Messages by id |
//! | `GET` | `/v1/channels/{id}/messages/{msg}/media` | Media bytes |
//!
//! # Paging
//!
//! History is fetched `page_size` messages at a time. Descending scans
//! continue from `offset_id` (the last id seen, exclusive); the ascending
//! `newer_than` scan continues from `min_id`. A page shorter than
//! `page_size` ends the stream. `max_id` is inclusive.

use std::time::Duration;

use anyhow::{Context, Result};
use async_stream::stream;
use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::TelegramConfig;
use crate::error::PlatformError;
use crate::models::{EntityHandle, RawMessage, ScanBound};
use crate::platform::{ClientMode, MessageStream, PlatformClient};

/// A gateway-backed platform session.
pub struct GatewayClient {
    http: reqwest::Client,
    base_url: String,
    mode: ClientMode,
    api_id: i64,
    api_hash: String,
    bot_token: Option<String>,
    page_size: usize,
}

#[derive(Deserialize)]
struct MessagePage {
    messages: Vec<RawMessage>,
}

#[derive(Deserialize)]
struct LookupResponse {
    messages: Vec<Option<RawMessage>>,
}

#[derive(Serialize)]
struct LookupRequest<'a> {
    ids: &'a [i64],
}

impl GatewayClient {
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        let mode = if config.is_bot() {
            ClientMode::Bot
        } else {
            ClientMode::User
        };

        Ok(Self {
            http,
            base_url: config.gateway_url.trim_end_matches('/').to_string(),
            mode,
            api_id: config.api_id,
            api_hash: config.api_hash.clone(),
            bot_token: config.bot_token.clone().filter(|_| mode == ClientMode::Bot),
            page_size: config.page_size,
        })
    }

    /// Open the session on the gateway. Credential or network errors are
    /// returned to the caller, which treats them as fatal.
    pub async fn authenticate(&self) -> Result<(), PlatformError> {
        let response = self
            .request(self.http.post(self.url("/v1/session")))
            .json(&serde_json::json!({ "mode": self.mode.as_str() }))
            .send()
            .await?;
        check_status(response, "session").await?;
        Ok(())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder
            .header("X-Api-Id", self.api_id.to_string())
            .header("X-Api-Hash", &self.api_hash);
        match &self.bot_token {
            Some(token) => builder.header("Authorization", format!("Bot {}", token)),
            None => builder,
        }
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

    async fn fetch_page(
        &self,
        handle: &EntityHandle,
        bound: ScanBound,
        cursor: Option<i64>,
    ) -> Result<Vec<RawMessage>, PlatformError> {
        let mut query: Vec<(&str, String)> = vec![("limit", self.page_size.to_string())];
        match bound {
            ScanBound::Unbounded => {}
            ScanBound::MaxId(max_id) => query.push(("max_id", max_id.to_string())),
            ScanBound::NewerThan(ts) => {
                query.push(("offset_date", ts.to_rfc3339()));
                query.push(("reverse", "true".to_string()));
            }
            ScanBound::OlderThan(ts) => query.push(("offset_date", ts.to_rfc3339())),
        }
        if let Some(cursor) = cursor {
            let key = match bound {
                ScanBound::NewerThan(_) => "min_id",
                _ => "offset_id",
            };
            query.push((key, cursor.to_string()));
        }

        let response = self
            .request(
                self.http
                    .get(self.url(&format!("/v1/channels/{}/messages", handle.id))),
            )
            .query(&query)
            .send()
            .await?;
        let page: MessagePage = check_status(response, &handle.id.to_string())
            .await?
            .json()
            .await?;

        debug!(
            channel = handle.id,
            %bound,
            ?cursor,
            fetched = page.messages.len(),
            "fetched history page"
        );
        Ok(page.messages)
    }
}

#[async_trait]
impl PlatformClient for GatewayClient {
    fn mode(&self) -> ClientMode {
        self.mode
    }

    async fn resolve_entity(&self, identifier: &str) -> Result<EntityHandle, PlatformError> {
        let identifier = identifier.trim_start_matches('@');
        let response = self
            .request(
                self.http
                    .get(self.url(&format!("/v1/entities/{}", identifier))),
            )
            .send()
            .await?;
        let handle = check_status(response, identifier).await?.json().await?;
        Ok(handle)
    }

    async fn join_channel(&self, handle: &EntityHandle) -> Result<(), PlatformError> {
        self.require_user("join_channel")?;
        let response = self
            .request(
                self.http
                    .post(self.url(&format!("/v1/channels/{}/join", handle.id))),
            )
            .send()
            .await?;
        check_status(response, &handle.id.to_string()).await?;
        Ok(())
    }

    fn stream_messages<'a>(
        &'a self,
        handle: &'a EntityHandle,
        bound: ScanBound,
    ) -> MessageStream<'a> {
        Box::pin(stream! {
            if let Err(err) = self.require_user("stream_messages") {
                yield Err(err);
            } else {
                let mut cursor: Option<i64> = None;
                loop {
                    let page = match self.fetch_page(handle, bound, cursor).await {
                        Ok(page) => page,
                        Err(err) => {
                            yield Err(err);
                            break;
                        }
                    };
                    let last_page = page.len() < self.page_size;
                    for message in page {
                        cursor = Some(message.id);
                        yield Ok(message);
                    }
                    if last_page {
                        break;
                    }
                }
            }
        })
    }

    async fn get_messages_by_ids(
        &self,
        handle: &EntityHandle,
        ids: &[i64],
    ) -> Result<Vec<Option<RawMessage>>, PlatformError> {
        let response = self
            .request(
                self.http
                    .post(self.url(&format!("/v1/channels/{}/messages/lookup", handle.id))),
            )
            .json(&LookupRequest { ids })
            .send()
            .await?;
        let lookup: LookupResponse = check_status(response, &handle.id.to_string())
            .await?
            .json()
            .await?;

        if lookup.messages.len() != ids.len() {
            return Err(PlatformError::Protocol(format!(
                "lookup of {} ids returned {} slots",
                ids.len(),
                lookup.messages.len()
            )));
        }
        Ok(lookup.messages)
    }

    async fn download_media(&self, message: &RawMessage) -> Result<Vec<u8>, PlatformError> {
        if message.media.is_none() {
            return Err(PlatformError::Protocol(format!(
                "message {} has no media",
                message.id
            )));
        }
        let response = self
            .request(self.http.get(self.url(&format!(
                "/v1/channels/{}/messages/{}/media",
                message.chat_id, message.id
            ))))
            .send()
            .await?;
        let bytes = check_status(response, &format!("{}/{}", message.chat_id, message.id))
            .await?
            .bytes()
            .await?;
        Ok(bytes.to_vec())
    }
}

/// Map gateway status codes onto [`PlatformError`] variants.
async fn check_status(response: Response, subject: &str) -> Result<Response, PlatformError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    match status {
        StatusCode::NOT_FOUND => Err(PlatformError::NotFound(subject.to_string())),
        StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => {
            Err(PlatformError::AccessDenied(subject.to_string()))
        }
        _ => {
            let body = response.text().await.unwrap_or_default();
            Err(PlatformError::Protocol(format!(
                "{} returned {}: {}",
                subject, status, body
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn telegram_config(bot_token: Option<&str>) -> TelegramConfig {
        TelegramConfig {
            api_id: 1,
            api_hash: "hash".to_string(),
            bot_token: bot_token.map(str::to_string),
            gateway_url: "http://127.0.0.1:9/".to_string(),
            timeout_secs: 1,
            page_size: 100,
        }
    }

    #[test]
    fn test_mode_follows_bot_token() {
        let user = GatewayClient::new(&telegram_config(None)).unwrap();
        assert_eq!(user.mode(), ClientMode::User);
        assert_eq!(user.url("/v1/session"), "http://127.0.0.1:9/v1/session");

        let bot = GatewayClient::new(&telegram_config(Some("123:abc"))).unwrap();
        assert_eq!(bot.mode(), ClientMode::Bot);

        let blank = GatewayClient::new(&telegram_config(Some("  "))).unwrap();
        assert_eq!(blank.mode(), ClientMode::User);
        assert!(blank.bot_token.is_none());
    }

    #[tokio::test]
    async fn test_bot_session_cannot_join() {
        let bot = GatewayClient::new(&telegram_config(Some("123:abc"))).unwrap();
        let handle = EntityHandle {
            id: -1001,
            kind: crate::models::EntityKind::Channel,
            title: None,
            username: None,
            access_hash: None,
        };
        let err = bot.join_channel(&handle).await.unwrap_err();
        assert!(matches!(err, PlatformError::Unsupported { .. }));
    }
}
