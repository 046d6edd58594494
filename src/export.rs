//! Serialize a scan's record collection.
//!
//! Records are written as one pretty-printed JSON array. Timestamps are
//! RFC 3339 strings and binary fields are base64 strings, so the output is
//! plain JSON throughout.

use anyhow::{Context, Result};
use std::path::Path;

use crate::models::MessageRecord;

/// Write records as JSON.
///
/// If `output` is `Some`, writes to that file path. Otherwise writes
/// to stdout for piping.
pub fn write_records(records: &[MessageRecord], output: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(records)?;

    match output {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, &json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!("Exported {} records to {}", records.len(), path.display());
        }
        None => {
            println!("{}", json);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DownloadRecord, Enrichments, RawMessage};
    use chrono::{TimeZone, Utc};
    use serde_json::Map;
    use tempfile::TempDir;

    #[test]
    fn test_write_then_read() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out").join("records.json");
        let message = RawMessage {
            id: 3,
            chat_id: -1001,
            date: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
            sender_id: None,
            text: None,
            media: None,
            reply_to_msg_id: None,
            extra: Map::new(),
        };
        let record = MessageRecord::new(
            &message,
            Enrichments::default(),
            Some(DownloadRecord {
                sha256: "ab".repeat(32),
                download_time: Utc.with_ymd_and_hms(2024, 1, 2, 3, 5, 0).unwrap(),
            }),
        );

        write_records(&[record.clone()], Some(&path)).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"download_time\": \"2024-01-02T03:05:00Z\""));
        let back: Vec<MessageRecord> = serde_json::from_str(&text).unwrap();
        assert_eq!(back, vec![record]);
    }
}
