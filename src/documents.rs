//! Content-addressed document storage.
//!
//! A message's document attachment is downloaded, hashed with SHA-256, and
//! written to `<download_path>/<hex digest>`. Identical bytes always land on
//! the same file, so storing twice is a no-op. Declared MIME types matching
//! the exclusion set are never downloaded.
//!
//! Writes go to a uniquely named `.part` file first and are renamed into
//! place, so a digest-named file is always complete.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{DownloadRecord, RawMessage};
use crate::platform::PlatformClient;

/// MIME types excluded from download.
///
/// Plain entries match exactly (case-insensitive); entries containing glob
/// metacharacters (`image/*`) match as patterns.
#[derive(Debug, Clone)]
pub struct MimeFilter {
    exact: HashSet<String>,
    patterns: GlobSet,
}

impl MimeFilter {
    pub fn new(entries: &[String]) -> Result<Self> {
        let mut exact = HashSet::new();
        let mut builder = GlobSetBuilder::new();
        for entry in entries {
            let entry = entry.trim().to_ascii_lowercase();
            if entry.contains(['*', '?', '[', '{']) {
                builder.add(
                    Glob::new(&entry)
                        .with_context(|| format!("Invalid MIME pattern: '{}'", entry))?,
                );
            } else {
                exact.insert(entry);
            }
        }
        Ok(Self {
            exact,
            patterns: builder.build()?,
        })
    }

    pub fn is_excluded(&self, mime_type: &str) -> bool {
        let mime_type = mime_type.trim().to_ascii_lowercase();
        self.exact.contains(&mime_type) || self.patterns.is_match(&mime_type)
    }
}

/// What happened when a message went through the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOutcome {
    /// The document was downloaded and written.
    Stored(DownloadRecord),
    /// The document was downloaded but a file with its digest already existed.
    AlreadyStored(DownloadRecord),
    /// The message carries no document.
    NotDocument,
    /// The declared MIME type is excluded.
    Excluded(String),
    /// The blob could not be retrieved.
    Failed,
}

impl StoreOutcome {
    pub fn record(&self) -> Option<&DownloadRecord> {
        match self {
            StoreOutcome::Stored(record) | StoreOutcome::AlreadyStored(record) => Some(record),
            _ => None,
        }
    }

    pub fn into_record(self) -> Option<DownloadRecord> {
        match self {
            StoreOutcome::Stored(record) | StoreOutcome::AlreadyStored(record) => Some(record),
            _ => None,
        }
    }
}

pub struct DocumentStore {
    root: PathBuf,
    excluded: MimeFilter,
}

impl DocumentStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub fn open(root: &Path, excluded_mime_types: &[String]) -> Result<Self> {
        std::fs::create_dir_all(root)
            .with_context(|| format!("Failed to create download directory: {}", root.display()))?;
        Ok(Self {
            root: root.to_path_buf(),
            excluded: MimeFilter::new(excluded_mime_types)?,
        })
    }

    /// Where a blob with this digest is stored.
    pub fn path_for(&self, digest: &str) -> PathBuf {
        self.root.join(digest)
    }

    /// Persist the message's document, if it has one worth keeping.
    ///
    /// Messages without a document and excluded MIME types are normal
    /// no-ops. A failed download is logged and reported as
    /// [`StoreOutcome::Failed`]. Only local I/O errors are returned as `Err`.
    pub async fn store(
        &self,
        client: &dyn PlatformClient,
        message: &RawMessage,
    ) -> Result<StoreOutcome> {
        let mime_type = match message.document_mime_type() {
            Some(mime_type) => mime_type,
            None => return Ok(StoreOutcome::NotDocument),
        };

        if self.excluded.is_excluded(&mime_type) {
            debug!(message_id = message.id, %mime_type, "document MIME type excluded");
            return Ok(StoreOutcome::Excluded(mime_type));
        }

        let blob = match client.download_media(message).await {
            Ok(blob) => blob,
            Err(err) => {
                warn!(
                    message_id = message.id,
                    chat_id = message.chat_id,
                    error = %err,
                    "document download failed"
                );
                return Ok(StoreOutcome::Failed);
            }
        };

        let digest = sha256_hex(&blob);
        let written = self.write_blob(&digest, &blob).await?;
        let record = DownloadRecord {
            sha256: digest,
            download_time: Utc::now(),
        };

        if written {
            debug!(message_id = message.id, sha256 = %record.sha256, bytes = blob.len(), "downloaded file");
            Ok(StoreOutcome::Stored(record))
        } else {
            debug!(message_id = message.id, sha256 = %record.sha256, "file already stored");
            Ok(StoreOutcome::AlreadyStored(record))
        }
    }

    /// Write a blob under its digest. Returns `false` when the file already
    /// existed.
    async fn write_blob(&self, digest: &str, blob: &[u8]) -> Result<bool> {
        let target = self.path_for(digest);
        let exists = tokio::fs::try_exists(&target)
            .await
            .with_context(|| format!("Failed to check {}", target.display()))?;
        if exists {
            return Ok(false);
        }

        let partial = self.root.join(format!(".{}.{}.part", digest, Uuid::new_v4()));
        tokio::fs::write(&partial, blob)
            .await
            .with_context(|| format!("Failed to write {}", partial.display()))?;
        if let Err(err) = tokio::fs::rename(&partial, &target).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(err).with_context(|| format!("Failed to store {}", target.display()));
        }
        Ok(true)
    }
}

/// Lowercase hex SHA-256 of the content.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
