use serde::{Deserialize, Serialize};

use crate::core::bluetooth::constants::DEFAULT_SCAN_DURATION_SECS;

/// Scan settings configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// How long a scan runs before stopping on its own. 0 keeps scanning
    /// until stopped explicitly.
    pub timeout_secs: u64,
    /// Only list devices whose advertised name contains this (case-insensitive).
    pub name_filter: Option<String>,
    /// Only list devices at least this strong (dBm).
    pub min_rssi: Option<i16>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig {
            timeout_secs: DEFAULT_SCAN_DURATION_SECS,
            name_filter: None,
            min_rssi: None,
        }
    }
}
