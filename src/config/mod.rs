pub mod last_device;
pub mod link_config;
pub mod scan_config;

use std::path::Path;

use anyhow::{Context, Result};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::config::link_config::LinkConfig;
use crate::config::scan_config::ScanConfig;
use crate::utils::ensure_directory_exists;

pub const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub scan: ScanConfig,
    pub link: LinkConfig,
    /// Log level used when none is given on the command line.
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            scan: ScanConfig::default(),
            link: LinkConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

/// Where a loaded config came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    File,
    /// No file existed; defaults were used.
    Defaults,
}

impl AppConfig {
    /// Loads the config from `file_path`, falling back to defaults when the
    /// file does not exist.
    pub async fn load_config(file_path: &Path) -> Result<Self> {
        let (config, source) = Self::load_with_source(file_path).await?;
        if source == ConfigSource::Defaults {
            warn!(
                "Config file not found at {}, using default.",
                file_path.display()
            );
        }
        Ok(config)
    }

    /// Like [`load_config`](Self::load_config), but leaves reporting a
    /// missing file to the caller. Used before logging is set up.
    pub async fn load_with_source(file_path: &Path) -> Result<(Self, ConfigSource)> {
        if !file_path.exists() {
            return Ok((Self::default(), ConfigSource::Defaults));
        }

        let config_json = fs::read_to_string(file_path)
            .await
            .with_context(|| format!("reading {}", file_path.display()))?;
        let config: Self = serde_json::from_str(&config_json)
            .with_context(|| format!("parsing {}", file_path.display()))?;

        info!("Config loaded from {}", file_path.display());
        Ok((config, ConfigSource::File))
    }

    /// Saves the current config to `file_path`.
    pub async fn save_config(&self, file_path: &Path) -> Result<()> {
        if let Some(dir) = file_path.parent() {
            ensure_directory_exists(dir)?;
        }

        let config_json = match serde_json::to_string_pretty(&self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize config to JSON: {}", e);
                return Err(e.into());
            }
        };

        fs::write(file_path, config_json).await?;

        info!("Config saved to {}.", file_path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = AppConfig::load_config(&dir.path().join(CONFIG_FILE_NAME))
            .await
            .expect("defaults");
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.scan.timeout_secs, 10);
    }

    #[tokio::test]
    async fn save_then_load_keeps_changes() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("nested").join(CONFIG_FILE_NAME);
        let mut config = AppConfig::default();
        config.scan.min_rssi = Some(-75);
        config.link.extra_commands = vec!["LIGHTS_ON".into()];

        config.save_config(&path).await.expect("save");
        let loaded = AppConfig::load_config(&path).await.expect("load");
        assert_eq!(loaded, config);
    }

    #[tokio::test]
    async fn source_tells_file_from_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join(CONFIG_FILE_NAME);

        let (_, source) = AppConfig::load_with_source(&path).await.expect("defaults");
        assert_eq!(source, ConfigSource::Defaults);

        AppConfig::default().save_config(&path).await.expect("save");
        let (_, source) = AppConfig::load_with_source(&path).await.expect("load");
        assert_eq!(source, ConfigSource::File);
    }

    #[tokio::test]
    async fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, r#"{ "scan": { "timeout_secs": 0 } }"#).expect("write");

        let loaded = AppConfig::load_config(&path).await.expect("load");
        assert_eq!(loaded.scan.timeout_secs, 0);
        assert_eq!(loaded.link, LinkConfig::default());
        assert_eq!(loaded.log_level, "info");
    }

    #[tokio::test]
    async fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[").expect("write");
        assert!(AppConfig::load_config(&path).await.is_err());
    }
}
