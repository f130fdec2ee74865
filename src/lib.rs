pub mod commands;
pub mod config;
pub mod core;
pub mod logging;
pub mod state;
pub mod utils;

pub use crate::core::bluetooth::{
    CommandToken, ConnectionState, CoreEvent, DeviceAddress, DeviceIdentity, SessionStatus,
};
pub use crate::core::{CoreError, ScooterManager};
