//! Append-only crash journal for naive scans.
//!
//! Every record collected by a naive scan is appended as one JSON line and
//! flushed before the scan moves on, so a crash loses at most the message
//! being processed. A journal has exactly one writer; concurrent scans must
//! use distinct paths, which [`Journal::per_run`] guarantees.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::models::MessageRecord;

pub struct Journal {
    path: PathBuf,
    file: File,
    written: u64,
}

impl Journal {
    /// Open (or create) a journal for appending.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("Failed to open journal: {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            written: 0,
        })
    }

    /// Open a fresh journal with a unique name inside `dir`.
    pub async fn per_run(dir: &Path) -> Result<Self> {
        let path = dir.join(format!("naive-{}.jsonl", Uuid::new_v4()));
        Self::open(&path).await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records appended through this handle.
    pub fn written(&self) -> u64 {
        self.written
    }

    pub async fn append(&mut self, record: &MessageRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        self.file
            .write_all(&line)
            .await
            .with_context(|| format!("Failed to append to {}", self.path.display()))?;
        self.file.flush().await?;
        self.written += 1;
        Ok(())
    }
}

/// Read back every record from a journal. A torn final line (from a crash
/// mid-write) is ignored.
pub fn read_journal(path: &Path) -> Result<Vec<MessageRecord>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read journal: {}", path.display()))?;
    let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();

    let mut records: Vec<MessageRecord> = Vec::with_capacity(lines.len());
    for (i, line) in lines.iter().enumerate() {
        match serde_json::from_str(line) {
            Ok(record) => records.push(record),
            Err(_) if i + 1 == lines.len() && !content.ends_with('\n') => break,
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("Corrupt journal line {} in {}", i + 1, path.display())
                })
            }
        }
    }
    Ok(records)
}
