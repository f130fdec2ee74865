//! Constants used throughout the application
//! This module contains the constant values used by the core, such as
//! UUIDs, timeouts and persistence keys.

use uuid::Uuid;

/// Key of the last-device slot in the key/value store
pub const LAST_DEVICE_KEY: &str = "LAST_DEVICE";

/// File backing the key/value store
pub const PREFS_FILE_NAME: &str = "ble_prefs.json";

/// Nordic UART service, the command channel most scooter controllers expose
pub const UUID_COMMAND_SERVICE: Uuid = Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e);

/// Nordic UART RX characteristic, written by the central
pub const UUID_COMMAND_WRITE_CHAR: Uuid = Uuid::from_u128(0x6e400002_b5a3_f393_e0a9_e50e24dcca9e);

/// Scan duration in seconds
pub const DEFAULT_SCAN_DURATION_SECS: u64 = 10;

/// Timeout for establishing a link in seconds
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 15;

/// How long to scan for a device that is not in the cache, in seconds
pub const DEFAULT_RESOLVE_TIMEOUT_SECS: u64 = 5;

/// Buffer size of the core event broadcast channel
pub const EVENT_CHANNEL_CAPACITY: usize = 64;
