//! Configuration parsing and validation.
//!
//! The primary format is a sectioned TOML file. A flat JSON file using the
//! older camelCase keys (`telegramApiID`, `telegramApiHash`, `botToken`,
//! `downloadPath`, `excludedMimeTypes`) is also accepted and migrated.
//!
//! ```toml
//! [telegram]
//! api_id = 12345
//! api_hash = "0123456789abcdef"
//! # bot_token = "123:abc"        # bot mode; enables only the naive scan
//! gateway_url = "http://127.0.0.1:8081"
//!
//! [documents]
//! download_path = "./data/documents"
//! excluded_mime_types = ["image/jpeg", "video/*"]
//!
//! [scan]
//! window_size = 100
//! empty_window_limit = 4
//! crash_log_dir = "./data/journal"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub telegram: TelegramConfig,
    pub documents: DocumentsConfig,
    #[serde(default)]
    pub scan: ScanConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    #[serde(alias = "telegramApiID")]
    pub api_id: i64,
    #[serde(alias = "telegramApiHash")]
    pub api_hash: String,
    #[serde(default, alias = "botToken")]
    pub bot_token: Option<String>,
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl TelegramConfig {
    /// Bot mode is selected by the presence of a non-empty bot token.
    pub fn is_bot(&self) -> bool {
        self.bot_token
            .as_deref()
            .map(|t| !t.trim().is_empty())
            .unwrap_or(false)
    }
}

fn default_gateway_url() -> String {
    "http://127.0.0.1:8081".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_page_size() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct DocumentsConfig {
    #[serde(alias = "downloadPath")]
    pub download_path: PathBuf,
    #[serde(default, alias = "excludedMimeTypes")]
    pub excluded_mime_types: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScanConfig {
    #[serde(default = "default_window_size")]
    pub window_size: i64,
    #[serde(default = "default_empty_window_limit")]
    pub empty_window_limit: u32,
    #[serde(default = "default_crash_log_dir")]
    pub crash_log_dir: PathBuf,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            empty_window_limit: default_empty_window_limit(),
            crash_log_dir: default_crash_log_dir(),
        }
    }
}

/// Upper bound for `scan.window_size`; each window's ids are materialized.
pub const MAX_WINDOW_SIZE: i64 = 10_000;

fn default_window_size() -> i64 {
    100
}
fn default_empty_window_limit() -> u32 {
    4
}
fn default_crash_log_dir() -> PathBuf {
    std::env::temp_dir().join("channel-harness")
}

/// Flat camelCase layout of the older JSON configuration files.
#[derive(Debug, Deserialize)]
struct LegacyConfig {
    #[serde(rename = "telegramApiID")]
    telegram_api_id: LegacyApiId,
    #[serde(rename = "telegramApiHash")]
    telegram_api_hash: String,
    #[serde(default, rename = "botToken")]
    bot_token: Option<String>,
    #[serde(rename = "downloadPath")]
    download_path: PathBuf,
    #[serde(default, rename = "excludedMimeTypes")]
    excluded_mime_types: Vec<String>,
}

/// The API id was written both as a number and as a quoted string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LegacyApiId {
    Number(i64),
    Text(String),
}

impl LegacyConfig {
    fn migrate(self) -> Result<Config> {
        let api_id = match self.telegram_api_id {
            LegacyApiId::Number(id) => id,
            LegacyApiId::Text(text) => text
                .trim()
                .parse()
                .with_context(|| format!("telegramApiID is not a number: '{}'", text))?,
        };
        Ok(Config {
            telegram: TelegramConfig {
                api_id,
                api_hash: self.telegram_api_hash,
                bot_token: self.bot_token,
                gateway_url: default_gateway_url(),
                timeout_secs: default_timeout_secs(),
                page_size: default_page_size(),
            },
            documents: DocumentsConfig {
                download_path: self.download_path,
                excluded_mime_types: self.excluded_mime_types,
            },
            scan: ScanConfig::default(),
        })
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let is_json = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let config = if is_json {
        let legacy: LegacyConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        legacy.migrate()?
    } else {
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?
    };

    validate(&config)?;

    if !config.documents.download_path.exists() {
        std::fs::create_dir_all(&config.documents.download_path).with_context(|| {
            format!(
                "Failed to create download directory: {}",
                config.documents.download_path.display()
            )
        })?;
    }

    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.telegram.api_id <= 0 {
        bail!("telegram.api_id must be > 0");
    }
    if config.telegram.api_hash.trim().is_empty() {
        bail!("telegram.api_hash must not be empty");
    }
    if config.telegram.page_size == 0 {
        bail!("telegram.page_size must be > 0");
    }
    if !(1..=MAX_WINDOW_SIZE).contains(&config.scan.window_size) {
        bail!("scan.window_size must be between 1 and {}", MAX_WINDOW_SIZE);
    }
    if config.scan.empty_window_limit == 0 {
        bail!("scan.empty_window_limit must be >= 1");
    }
    crate::documents::MimeFilter::new(&config.documents.excluded_mime_types)
        .context("documents.excluded_mime_types contains an invalid pattern")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_toml_with_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("chx.toml");
        std::fs::write(
            &path,
            format!(
                r#"[telegram]
api_id = 12345
api_hash = "abcdef"

[documents]
download_path = "{}/docs"
excluded_mime_types = ["image/jpeg"]
"#,
                tmp.path().display()
            ),
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.telegram.api_id, 12345);
        assert!(!config.telegram.is_bot());
        assert_eq!(config.scan.window_size, 100);
        assert_eq!(config.scan.empty_window_limit, 4);
        assert!(config.documents.download_path.is_dir());
    }

    #[test]
    fn test_load_legacy_json() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        let docs = tmp.path().join("downloads");
        std::fs::write(
            &path,
            serde_json::json!({
                "telegramApiID": "777",
                "telegramApiHash": "hash",
                "botToken": "123:abc",
                "downloadPath": docs,
                "excludedMimeTypes": ["image/jpeg", "image/png"]
            })
            .to_string(),
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.telegram.api_id, 777);
        assert!(config.telegram.is_bot());
        assert_eq!(config.documents.excluded_mime_types.len(), 2);
        assert!(docs.is_dir());
    }

    fn write_with_window(tmp: &TempDir, window_size: i64) -> PathBuf {
        let path = tmp.path().join("chx.toml");
        std::fs::write(
            &path,
            format!(
                r#"[telegram]
api_id = 1
api_hash = "h"

[documents]
download_path = "{}/docs"

[scan]
window_size = {}
"#,
                tmp.path().display(),
                window_size
            ),
        )
        .unwrap();
        path
    }

    #[test]
    fn test_rejects_zero_window() {
        let tmp = TempDir::new().unwrap();
        let err = load_config(&write_with_window(&tmp, 0)).unwrap_err();
        assert!(err.to_string().contains("window_size"));
    }

    #[test]
    fn test_rejects_oversized_window() {
        let tmp = TempDir::new().unwrap();
        let err = load_config(&write_with_window(&tmp, i64::MAX)).unwrap_err();
        assert!(err.to_string().contains("window_size"));

        let ok = load_config(&write_with_window(&tmp, MAX_WINDOW_SIZE)).unwrap();
        assert_eq!(ok.scan.window_size, MAX_WINDOW_SIZE);
    }

    #[test]
    fn test_missing_file_is_error() {
        let err = load_config(Path::new("/nonexistent/chx.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
