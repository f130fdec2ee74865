//! Bluetooth functionality for the scooter link
//! This module handles scanning for scooters, keeping one connection
//! alive and sending mode commands over it.

pub mod bluest_transport;
pub mod commands;
pub mod connection;
pub mod constants;
pub mod manager;
pub mod registry;
pub mod scanner;
pub mod shared;
pub mod transport;
pub mod types;

// Re-export types that should be publicly accessible
pub use commands::{CommandDispatcher, CommandToken};
pub use connection::{ConnectionSession, Transition};
pub use manager::ScooterManager;
pub use registry::DeviceRegistry;
pub use scanner::{ScanController, ScanFilter};
pub use transport::{
    CommandEncoder, ConnectionTransport, DiscoveryTransport, LinkEventSender, LinkSignal,
    PlainTextEncoder,
};
pub use types::{
    Advertisement, ConnectionState, CoreEvent, DeviceAddress, DeviceIdentity, LinkEvent,
    SessionStatus,
};
