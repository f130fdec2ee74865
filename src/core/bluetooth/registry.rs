use std::collections::HashSet;

use crate::core::bluetooth::types::{DeviceAddress, DeviceIdentity};

/// Devices seen during the current scan, first-seen-first-listed and unique
/// by address.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Vec<DeviceIdentity>,
    seen: HashSet<DeviceAddress>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `identity` unless its address is already listed. Returns
    /// whether it was new.
    pub fn insert(&mut self, identity: DeviceIdentity) -> bool {
        if !self.seen.insert(identity.address.clone()) {
            return false;
        }
        self.devices.push(identity);
        true
    }

    pub fn clear(&mut self) {
        self.devices.clear();
        self.seen.clear();
    }

    pub fn get(&self, address: &DeviceAddress) -> Option<&DeviceIdentity> {
        if !self.seen.contains(address) {
            return None;
        }
        self.devices.iter().find(|d| &d.address == address)
    }

    pub fn devices(&self) -> &[DeviceIdentity] {
        &self.devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
