//! Mention-tag enrichment.
//!
//! Extracts every `@handle` token from a message body and tries to resolve
//! each one through the platform. A handle that does not resolve is kept
//! with an empty id; it never stops the remaining tags from being resolved.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::models::{Enrichments, RawMessage, Tag, TagId};
use crate::platform::PlatformClient;

static MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@(\w+)").expect("valid mention regex"));

/// Mention names in match order, without the `@`. Duplicates are kept.
pub fn extract_mentions(text: &str) -> Vec<&str> {
    MENTION
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect()
}

/// Derive enrichments for a message.
///
/// Returns empty enrichments (no `tags` key) unless the message has a
/// non-empty text body containing `@`.
pub async fn enrich_message(client: &dyn PlatformClient, message: &RawMessage) -> Enrichments {
    let text = match message.text() {
        Some(text) if text.contains('@') => text,
        _ => return Enrichments::default(),
    };

    let mut tags = Vec::new();
    for name in extract_mentions(text) {
        let id = match client.resolve_entity(name).await {
            Ok(handle) => TagId::Resolved(handle.id),
            Err(err) => {
                debug!(message_id = message.id, tag = name, error = %err, "mention did not resolve");
                TagId::Unresolved
            }
        };
        tags.push(Tag {
            tag_name: name.to_string(),
            id,
        });
    }

    Enrichments { tags: Some(tags) }
}
