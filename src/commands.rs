//! Shell commands
//! This module defines the operations the command line front end invokes.
//! They only drive the manager and print what it reports.

use std::path::Path;
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use log::warn;
use tokio::sync::broadcast::error::RecvError;

use crate::config::AppConfig;
use crate::config::last_device::KeyValueStore;
use crate::core::ScooterManager;
use crate::core::bluetooth::transport::{ConnectionTransport, DiscoveryTransport};
use crate::core::bluetooth::types::{ConnectionState, CoreEvent, DeviceAddress, DeviceIdentity};
use crate::core::bluetooth::CommandToken;

/// What to do once a connection attempt has been started.
#[derive(Debug, Clone)]
pub struct SessionPlan {
    /// Command tokens to send, in order, once connected
    pub commands: Vec<String>,
    /// How long to wait for the link to come up
    pub connect_timeout: Duration,
    /// How long to wait for the command service before sending anyway
    pub ready_timeout: Duration,
    /// How long to keep the link open after the last command
    pub hold: Duration,
}

/// Writes the default config to `path`. An existing file is left alone
/// unless `force` is set. Returns whether the file was written.
pub async fn init_config(path: &Path, force: bool) -> Result<bool> {
    if path.exists() && !force {
        println!("Config already exists at {}", path.display());
        return Ok(false);
    }
    AppConfig::default().save_config(path).await?;
    println!("Wrote default config to {}", path.display());
    Ok(true)
}

/// Scans until the scan stops on its own or Ctrl+C, printing devices as
/// they are found.
pub async fn scan_devices<C, D, S>(manager: &ScooterManager<C, D, S>) -> Result<Vec<DeviceIdentity>>
where
    C: ConnectionTransport,
    D: DiscoveryTransport,
    S: KeyValueStore,
{
    let mut events = manager.subscribe();
    manager.start_scan().await?;
    println!("Scanning...");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(CoreEvent::DeviceFound(identity)) => println!("  {identity}"),
                Ok(CoreEvent::ScanStopped { found }) => {
                    println!("Scan finished, {found} device(s) found.");
                    break;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => warn!("Missed {missed} scan events"),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                manager.stop_scan().await;
            }
        }
    }
    Ok(manager.devices())
}

/// Connects to `address`, remembering it as the last device.
pub async fn connect_device<C, D, S>(
    manager: &ScooterManager<C, D, S>,
    address: &str,
    plan: &SessionPlan,
) -> Result<Vec<CommandToken>>
where
    C: ConnectionTransport,
    D: DiscoveryTransport,
    S: KeyValueStore,
{
    let address =
        DeviceAddress::parse(address).ok_or_else(|| anyhow!("Device address must not be empty"))?;
    manager.select_device(&address)?;
    run_session(manager, plan).await
}

/// Connects to the last selected device.
pub async fn reconnect<C, D, S>(
    manager: &ScooterManager<C, D, S>,
    plan: &SessionPlan,
) -> Result<Vec<CommandToken>>
where
    C: ConnectionTransport,
    D: DiscoveryTransport,
    S: KeyValueStore,
{
    let address = manager.auto_connect_last()?;
    println!("Reconnecting to {address}");
    run_session(manager, plan).await
}

pub fn show_last_device<C, D, S>(manager: &ScooterManager<C, D, S>) -> Option<DeviceAddress>
where
    C: ConnectionTransport,
    D: DiscoveryTransport,
    S: KeyValueStore,
{
    let last = manager.last_device();
    match &last {
        Some(address) => println!("Last device: {address}"),
        None => println!("No saved device"),
    }
    last
}

/// Waits for the pending connection, sends the planned commands and closes
/// the link. Returns the commands that were handed to the link.
async fn run_session<C, D, S>(
    manager: &ScooterManager<C, D, S>,
    plan: &SessionPlan,
) -> Result<Vec<CommandToken>>
where
    C: ConnectionTransport,
    D: DiscoveryTransport,
    S: KeyValueStore,
{
    println!("{}", manager.status());
    let settled = manager
        .wait_for_status(plan.connect_timeout, |s| s.state != ConnectionState::Connecting)
        .await;
    match settled {
        Some(status) if status.is_connected() => println!("{status}"),
        Some(status) => bail!("{status}"),
        None => {
            manager.disconnect();
            bail!(
                "Timed out after {}s waiting for the connection",
                plan.connect_timeout.as_secs()
            );
        }
    }

    if !plan.commands.is_empty() {
        let ready = manager
            .wait_for_status(plan.ready_timeout, |s| s.services_ready || !s.is_connected())
            .await;
        if !ready.is_some_and(|s| s.services_ready) {
            warn!("Command service not confirmed, sending anyway");
        }
    }

    let mut sent = Vec::new();
    for token in &plan.commands {
        match manager.dispatch(token) {
            Ok(command) => {
                println!("Sent {command}");
                sent.push(command);
            }
            Err(e) => println!("{e}"),
        }
    }

    tokio::time::sleep(plan.hold).await;
    manager.disconnect();
    println!("{}", manager.status());
    Ok(sent)
}
