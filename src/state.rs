//! Application state management
//! This module wires the bluest transports, the preference file and the
//! config into one manager.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use log::info;

use crate::config::AppConfig;
use crate::config::last_device::JsonFileStore;
use crate::core::ScooterManager;
use crate::core::bluetooth::bluest_transport::{
    BluestConnection, BluestDiscovery, DeviceCache, open_adapter,
};
use crate::core::bluetooth::constants::PREFS_FILE_NAME;

pub type BluestManager = ScooterManager<BluestConnection, BluestDiscovery, JsonFileStore>;

/// Global application state
pub struct AppState {
    pub config: AppConfig,
    /// The scooter manager instance
    pub manager: Arc<BluestManager>,
}

impl AppState {
    /// Opens the Bluetooth adapter and builds the manager. Preferences live
    /// next to the config file in `config_dir`.
    pub async fn new(config: AppConfig, config_dir: &Path) -> Result<Self> {
        info!("Initializing scooter manager...");
        let adapter = open_adapter().await?;
        let devices = DeviceCache::default();

        let connection =
            BluestConnection::new(adapter.clone(), devices.clone(), config.link.clone())?;
        let discovery = BluestDiscovery::new(adapter, devices);
        let store = JsonFileStore::new(config_dir.join(PREFS_FILE_NAME));
        let manager = ScooterManager::new(connection, discovery, store, &config);

        Ok(Self {
            config,
            manager: Arc::new(manager),
        })
    }
}
