use anyhow::Result;
use serde::Serialize;
use std::path::Path;

use crate::config::Config;

/// Health of one configured component.
#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub name: String,
    pub status: String,
    pub healthy: bool,
}

pub fn get_sources(config: &Config) -> Vec<SourceStatus> {
    let mode = if config.telegram.is_bot() { "bot" } else { "user" };
    let strategies = if config.telegram.is_bot() {
        "naive only"
    } else {
        "cursor, naive"
    };

    vec![
        SourceStatus {
            name: "telegram".to_string(),
            status: format!("{} session via {}", mode, config.telegram.gateway_url),
            healthy: !config.telegram.gateway_url.trim().is_empty(),
        },
        SourceStatus {
            name: "strategies".to_string(),
            status: strategies.to_string(),
            healthy: true,
        },
        dir_status("documents", &config.documents.download_path),
        dir_status("journal", &config.scan.crash_log_dir),
    ]
}

fn dir_status(name: &str, path: &Path) -> SourceStatus {
    let (status, healthy) = if path.is_dir() {
        let readonly = std::fs::metadata(path)
            .map(|m| m.permissions().readonly())
            .unwrap_or(true);
        if readonly {
            (format!("READ-ONLY {}", path.display()), false)
        } else {
            (format!("OK {}", path.display()), true)
        }
    } else if path.exists() {
        (format!("NOT A DIRECTORY {}", path.display()), false)
    } else {
        // created on first use
        (format!("MISSING {}", path.display()), true)
    };
    SourceStatus {
        name: name.to_string(),
        status,
        healthy,
    }
}

pub fn list_sources(config: &Config) -> Result<()> {
    println!("{:<12} {:<7} STATUS", "COMPONENT", "HEALTHY");
    for source in get_sources(config) {
        println!("{:<12} {:<7} {}", source.name, source.healthy, source.status);
    }
    if !config.documents.excluded_mime_types.is_empty() {
        println!(
            "excluded MIME types: {}",
            config.documents.excluded_mime_types.join(", ")
        );
    }
    Ok(())
}
