use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::bluetooth::constants::{
    DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_RESOLVE_TIMEOUT_SECS, UUID_COMMAND_SERVICE,
    UUID_COMMAND_WRITE_CHAR,
};

/// Link settings configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Give up on a connection attempt after this many seconds.
    pub connect_timeout_secs: u64,
    /// How long to scan for a device that was not seen in the current scan.
    pub resolve_timeout_secs: u64,
    /// GATT service carrying the command characteristic.
    pub command_service_uuid: Uuid,
    /// Characteristic commands are written to.
    pub command_char_uuid: Uuid,
    /// Command tokens accepted on top of MODE_DRIVE, MODE_SPORT and DIAGNOSTIC.
    pub extra_commands: Vec<String>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            resolve_timeout_secs: DEFAULT_RESOLVE_TIMEOUT_SECS,
            command_service_uuid: UUID_COMMAND_SERVICE,
            command_char_uuid: UUID_COMMAND_WRITE_CHAR,
            extra_commands: Vec::new(),
        }
    }
}
