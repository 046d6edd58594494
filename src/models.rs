//! Core data models used throughout Channel Harness.
//!
//! [`RawMessage`] is the typed shape of a platform message at the adapter
//! boundary. It is converted exactly once into the opaque `raw` mapping of a
//! [`MessageRecord`], next to the derived [`Enrichments`] and the optional
//! [`DownloadRecord`].

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// Kind of platform entity a handle points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    User,
    Group,
    Channel,
}

/// A resolved reference to a channel, dialog, or user.
///
/// Obtained once per scan and reused for every iteration call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityHandle {
    pub id: i64,
    pub kind: EntityKind,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub access_hash: Option<i64>,
}

/// Iteration bound for a cursor-based scan. Exactly one variant is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanBound {
    /// The entire channel history, newest first.
    #[default]
    Unbounded,
    /// Messages with `id <= max_id`, in the platform's native order.
    MaxId(i64),
    /// Messages at or after the timestamp, oldest first.
    NewerThan(DateTime<Utc>),
    /// Messages before the timestamp, newest first.
    OlderThan(DateTime<Utc>),
}

impl ScanBound {
    /// Build a bound from optional flags, rejecting any combination of two
    /// or more.
    pub fn from_options(
        max_id: Option<i64>,
        newer_than: Option<DateTime<Utc>>,
        older_than: Option<DateTime<Utc>>,
    ) -> Result<Self> {
        match (max_id, newer_than, older_than) {
            (None, None, None) => Ok(ScanBound::Unbounded),
            (Some(id), None, None) => Ok(ScanBound::MaxId(id)),
            (None, Some(ts), None) => Ok(ScanBound::NewerThan(ts)),
            (None, None, Some(ts)) => Ok(ScanBound::OlderThan(ts)),
            _ => bail!("max_id, newer_than and older_than are mutually exclusive"),
        }
    }

    /// Whether a message falls inside this bound.
    pub fn admits(&self, message: &RawMessage) -> bool {
        match self {
            ScanBound::Unbounded => true,
            ScanBound::MaxId(max_id) => message.id <= *max_id,
            ScanBound::NewerThan(ts) => message.date >= *ts,
            ScanBound::OlderThan(ts) => message.date < *ts,
        }
    }
}

impl std::fmt::Display for ScanBound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanBound::Unbounded => write!(f, "unbounded"),
            ScanBound::MaxId(id) => write!(f, "max_id={}", id),
            ScanBound::NewerThan(ts) => write!(f, "newer_than={}", ts.to_rfc3339()),
            ScanBound::OlderThan(ts) => write!(f, "older_than={}", ts.to_rfc3339()),
        }
    }
}

/// Typed view of the media attached to a message.
///
/// Parsed on demand from [`RawMessage::media`]; the platform's own media
/// object is what gets passed through. Unknown kinds read as
/// [`MediaDescriptor::Other`] and unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MediaDescriptor {
    Document {
        document_id: i64,
        mime_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        size: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_name: Option<String>,
        #[serde(default, with = "base64_bytes", skip_serializing_if = "Vec::is_empty")]
        file_reference: Vec<u8>,
    },
    Photo {
        photo_id: i64,
    },
    WebPage {
        #[serde(default)]
        url: Option<String>,
    },
    #[serde(other)]
    Other,
}

impl MediaDescriptor {
    /// The declared MIME type, when the media is a document.
    pub fn document_mime_type(&self) -> Option<&str> {
        match self {
            MediaDescriptor::Document { mime_type, .. } => Some(mime_type),
            _ => None,
        }
    }
}

/// A platform message as yielded by a [`PlatformClient`](crate::platform::PlatformClient).
///
/// Fields the pipeline inspects are typed; everything else the platform
/// sends is kept in `extra` and passed through untouched. `media` stays the
/// platform's JSON object; [`RawMessage::media_descriptor`] reads it.
/// Optional fields that were not sent are not written back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMessage {
    pub id: i64,
    #[serde(default)]
    pub chat_id: i64,
    pub date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<i64>,
    /// Text body.
    #[serde(default, rename = "message", skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_msg_id: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RawMessage {
    /// Convert into the opaque `raw` mapping stored on a [`MessageRecord`].
    pub fn to_record(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    /// Typed view of the attached media. A media object that does not fit
    /// any known kind reads as [`MediaDescriptor::Other`].
    pub fn media_descriptor(&self) -> Option<MediaDescriptor> {
        self.media.as_ref().map(|media| {
            MediaDescriptor::deserialize(media).unwrap_or(MediaDescriptor::Other)
        })
    }

    /// Declared MIME type of an attached document.
    pub fn document_mime_type(&self) -> Option<String> {
        match self.media_descriptor()? {
            MediaDescriptor::Document { mime_type, .. } => Some(mime_type),
            _ => None,
        }
    }

    /// Non-empty text body, if any.
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref().filter(|t| !t.is_empty())
    }
}

/// Identifier attached to a mention tag: the resolved entity id, or the
/// empty marker when resolution failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagId {
    Resolved(i64),
    Unresolved,
}

impl Serialize for TagId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            TagId::Resolved(id) => serializer.serialize_i64(*id),
            TagId::Unresolved => serializer.serialize_str(""),
        }
    }
}

impl<'de> Deserialize<'de> for TagId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Id(i64),
            Text(String),
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Id(id) => TagId::Resolved(id),
            Repr::Text(text) => text
                .parse::<i64>()
                .map(TagId::Resolved)
                .unwrap_or(TagId::Unresolved),
        })
    }
}

/// A `@mention` found in a message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub tag_name: String,
    pub id: TagId,
}

/// Annotations derived from message content.
///
/// `tags` is absent (not an empty list) when the message had no `@`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Enrichments {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<Tag>>,
}

impl Enrichments {
    pub fn is_empty(&self) -> bool {
        self.tags.is_none()
    }
}

/// Proof that a message's document was persisted under its digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRecord {
    pub sha256: String,
    pub download_time: DateTime<Utc>,
}

/// One platform message plus derived annotations. Immutable once collected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub raw: Map<String, Value>,
    #[serde(default)]
    pub enrichments: Enrichments,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_record: Option<DownloadRecord>,
}

impl MessageRecord {
    pub fn new(
        message: &RawMessage,
        enrichments: Enrichments,
        download_record: Option<DownloadRecord>,
    ) -> Self {
        Self {
            raw: message.to_record(),
            enrichments,
            download_record,
        }
    }

    /// Message id from the raw mapping.
    pub fn id(&self) -> Option<i64> {
        self.raw.get("id").and_then(Value::as_i64)
    }
}

/// Serialize binary fields as base64 strings.
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
