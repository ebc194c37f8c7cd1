//! Host configuration and its on-disk form
//!
//! The configuration is stored as pretty JSON. Writes go to a temp file that
//! is synced and renamed over the target, then the parent directory is synced.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;

use crate::document::FileSourceConfig;
use crate::parser::ParsingOptions;

/// Name of the configuration file inside a document root
pub const CONFIG_FILE_NAME: &str = "tessera.json";

/// Everything needed to stand up a document host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// How documents are parsed and compiled
    pub parsing: ParsingOptions,
    /// Where documents are read from
    pub files: FileSourceConfig,
}

/// Write `data` to `path` atomically
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let temp_path = path.with_extension("tmp");

    let mut file = File::create(&temp_path)
        .with_context(|| format!("Failed to create temp file: {:?}", temp_path))?;
    file.write_all(data).context("Failed to write data")?;
    file.sync_all().context("Failed to sync file")?;
    drop(file);

    fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to rename {:?} to {:?}", temp_path, path))?;

    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        let dir = OpenOptions::new()
            .read(true)
            .open(parent)
            .with_context(|| format!("Failed to open directory: {:?}", parent))?;
        dir.sync_all().context("Failed to sync directory")?;
    }

    Ok(())
}

/// Persist a configuration as pretty JSON
pub fn write_config(path: &Path, config: &HostConfig) -> Result<()> {
    let json = serde_json::to_vec_pretty(config).context("Failed to serialize config")?;
    write_atomic(path, &json)
}

/// Load a configuration; missing fields take their defaults
pub fn load_config(path: &Path) -> Result<HostConfig> {
    let data = fs::read(path).with_context(|| format!("Failed to read config: {:?}", path))?;
    let config: HostConfig = serde_json::from_slice(&data).context("Failed to deserialize config")?;
    tracing::debug!(path = ?path, "loaded host config");
    Ok(config)
}
