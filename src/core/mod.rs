//! Core functionality for the scooter link
//! This module contains discovery, connection and command dispatch

pub mod bluetooth;
pub mod error;

// Re-export commonly used types
pub use bluetooth::ScooterManager;
pub use error::{CoreError, TransportError};
