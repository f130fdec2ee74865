//! Defines shared data structures for the Bluetooth module.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::core::bluetooth::commands::CommandToken;
use crate::core::error::CoreError;

/// Hardware address of a peripheral, the identity key for every lookup.
///
/// Stored upper-cased and trimmed, so `aa:bb` and ` AA:BB ` name the same
/// device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceAddress(String);

impl DeviceAddress {
    /// Returns `None` for blank input.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_ascii_uppercase()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for DeviceAddress {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| "device address must not be empty".to_string())
    }
}

impl From<DeviceAddress> for String {
    fn from(address: DeviceAddress) -> Self {
        address.0
    }
}

/// A discovered peripheral. Two identities are the same device when their
/// addresses match, whatever names they advertised.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub address: DeviceAddress,
    pub name: Option<String>,
}

impl DeviceIdentity {
    pub fn new(address: DeviceAddress, name: Option<String>) -> Self {
        let name = name.filter(|n| !n.trim().is_empty());
        Self { address, name }
    }

    /// Identity known only by address, as recovered from the last-device slot.
    pub fn from_address(address: DeviceAddress) -> Self {
        Self { address, name: None }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Unknown")
    }
}

impl PartialEq for DeviceIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for DeviceIdentity {}

impl Hash for DeviceIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name(), self.address)
    }
}

/// One advertisement received during a scan.
#[derive(Debug, Clone)]
pub struct Advertisement {
    pub identity: DeviceIdentity,
    /// The signal strength (RSSI) of the advert, if the platform reports it
    pub rssi: Option<i16>,
}

impl Advertisement {
    pub fn new(identity: DeviceIdentity, rssi: Option<i16>) -> Self {
        Self { identity, rssi }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Connected,
}

/// Snapshot of the session for rendering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: ConnectionState,
    pub target: Option<DeviceIdentity>,
    pub services_ready: bool,
    pub last_failure: Option<String>,
}

impl SessionStatus {
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.state, &self.target) {
            (ConnectionState::Connecting, Some(target)) => {
                write!(f, "Connecting to {}...", target.address)
            }
            (ConnectionState::Connected, Some(target)) => {
                write!(f, "Connected to {}", target.address)
            }
            (ConnectionState::Idle, Some(target)) => match &self.last_failure {
                Some(reason) => write!(f, "Disconnected from {} ({reason})", target.address),
                None => write!(f, "Disconnected from {}", target.address),
            },
            _ => f.write_str("Disconnected"),
        }
    }
}

/// Link-level notifications posted by a connection transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Established,
    Lost,
    OpenFailed(String),
    ServicesResolved(bool),
}

/// Notifications for whatever renders the core's state.
#[derive(Debug, Clone)]
pub enum CoreEvent {
    ScanStarted,
    DeviceFound(DeviceIdentity),
    ScanStopped { found: usize },
    StatusChanged(SessionStatus),
    CommandSent(CommandToken),
    Failure(CoreError),
}
