//! bluest backed discovery and connection transports.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bluest::{Adapter, AdvertisingDevice, Characteristic, ConnectionEvent, Device};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use regex::Regex;
use tokio::runtime::Handle as RuntimeHandle;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::link_config::LinkConfig;
use crate::core::bluetooth::commands::CommandToken;
use crate::core::bluetooth::transport::{
    CommandEncoder, ConnectionTransport, DiscoveryTransport, LinkEventSender, PlainTextEncoder,
};
use crate::core::bluetooth::types::{Advertisement, DeviceAddress, DeviceIdentity};
use crate::core::error::TransportError;

/// Devices seen by the current scan, keyed by address. Shared by discovery
/// and connection so a selected device can be opened without rescanning.
pub struct DeviceCache<T = Device> {
    entries: Arc<Mutex<HashMap<DeviceAddress, T>>>,
}

impl<T> Clone for DeviceCache<T> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<T> Default for DeviceCache<T> {
    fn default() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<T: Clone> DeviceCache<T> {
    fn entries(&self) -> MutexGuard<'_, HashMap<DeviceAddress, T>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Forgets everything seen so far. Called when a new scan starts.
    pub fn clear(&self) {
        self.entries().clear();
    }

    pub fn insert(&self, address: DeviceAddress, device: T) {
        self.entries().insert(address, device);
    }

    pub fn get(&self, address: &DeviceAddress) -> Option<T> {
        self.entries().get(address).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

static MAC_ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([0-9A-Fa-f]{2}[:_-]){5}[0-9A-Fa-f]{2}").expect("MAC address pattern is valid")
});

/// Gets the default adapter and waits for it to be powered.
pub async fn open_adapter() -> Result<Adapter, TransportError> {
    let adapter = Adapter::default()
        .await
        .ok_or_else(|| TransportError::Unavailable("No Bluetooth adapter found".to_string()))?;
    adapter.wait_available().await?;
    info!("Bluetooth adapter is available.");
    Ok(adapter)
}

/// Address of `device`: the MAC embedded in its platform id when there is
/// one, the raw id otherwise (macOS only exposes opaque ids).
pub fn device_address(device: &Device) -> Option<DeviceAddress> {
    address_from_id(&device.id().to_string())
}

fn address_from_id(device_id: &str) -> Option<DeviceAddress> {
    match MAC_ADDRESS.find_iter(device_id).last() {
        Some(m) => DeviceAddress::parse(&m.as_str().replace(['_', '-'], ":")),
        None => DeviceAddress::parse(device_id),
    }
}

fn advertisement_from(found: &AdvertisingDevice) -> Option<Advertisement> {
    let address = device_address(&found.device)?;
    let name = found
        .adv_data
        .local_name
        .clone()
        .or_else(|| found.device.name().ok());
    Some(Advertisement::new(
        DeviceIdentity::new(address, name),
        found.rssi,
    ))
}

pub struct BluestDiscovery {
    adapter: Adapter,
    devices: DeviceCache,
    cancel_token: Mutex<CancellationToken>,
}

impl BluestDiscovery {
    pub fn new(adapter: Adapter, devices: DeviceCache) -> Self {
        Self {
            adapter,
            devices,
            cancel_token: Mutex::new(CancellationToken::new()),
        }
    }

    fn replace_token(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let previous = std::mem::replace(
            &mut *self
                .cancel_token
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
            token.clone(),
        );
        previous.cancel();
        token
    }

    async fn scan_task(
        adapter: Adapter,
        devices: DeviceCache,
        adverts: mpsc::UnboundedSender<Advertisement>,
        cancel_token: CancellationToken,
        ready: oneshot::Sender<Result<(), TransportError>>,
    ) {
        info!("Starting bluetooth scan");
        let mut scan_stream = match adapter.scan(&[]).await {
            Ok(stream) => {
                let _ = ready.send(Ok(()));
                stream
            }
            Err(e) => {
                error!("Failed to start bluetooth scan: {e}");
                let _ = ready.send(Err(e.into()));
                return;
            }
        };

        loop {
            tokio::select! {
                result = scan_stream.next() => {
                    let Some(found) = result else {
                        info!("Bluetooth scan stream has ended.");
                        break;
                    };
                    debug!("Found device - Device: {:?}, RSSI: {:?}", found.device, found.rssi);
                    let Some(advert) = advertisement_from(&found) else {
                        continue;
                    };
                    devices.insert(advert.identity.address.clone(), found.device);
                    if adverts.send(advert).is_err() {
                        break;
                    }
                }
                () = cancel_token.cancelled() => break,
                () = adverts.closed() => break,
            }
        }
        info!("Bluetooth scan stopped.");
    }
}

#[async_trait]
impl DiscoveryTransport for BluestDiscovery {
    async fn start(&self) -> Result<mpsc::UnboundedReceiver<Advertisement>, TransportError> {
        let cancel_token = self.replace_token();
        self.devices.clear();
        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        tokio::spawn(Self::scan_task(
            self.adapter.clone(),
            self.devices.clone(),
            tx,
            cancel_token,
            ready_tx,
        ));

        ready_rx
            .await
            .map_err(|_| TransportError::Backend("scan task exited before starting".to_string()))??;
        Ok(rx)
    }

    async fn stop(&self) -> Result<(), TransportError> {
        self.cancel_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
        Ok(())
    }
}

#[derive(Default)]
struct LinkSlot {
    device: Option<Device>,
    write_char: Option<Characteristic>,
}

/// An open or opening link. Dropping it without `close` leaves the device
/// connected.
pub struct BluestLink {
    address: DeviceAddress,
    cancel_token: CancellationToken,
    slot: Arc<Mutex<LinkSlot>>,
    events: LinkEventSender,
}

impl BluestLink {
    fn slot(&self) -> MutexGuard<'_, LinkSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct BluestConnection<E = PlainTextEncoder> {
    adapter: Adapter,
    devices: DeviceCache,
    config: LinkConfig,
    encoder: Arc<E>,
    runtime: RuntimeHandle,
}

impl BluestConnection<PlainTextEncoder> {
    pub fn new(
        adapter: Adapter,
        devices: DeviceCache,
        config: LinkConfig,
    ) -> Result<Self, TransportError> {
        Self::with_encoder(adapter, devices, config, PlainTextEncoder)
    }
}

impl<E: CommandEncoder> BluestConnection<E> {
    /// Must be called from within a Tokio runtime; link tasks are spawned on it.
    pub fn with_encoder(
        adapter: Adapter,
        devices: DeviceCache,
        config: LinkConfig,
        encoder: E,
    ) -> Result<Self, TransportError> {
        let runtime = RuntimeHandle::try_current()
            .map_err(|e| TransportError::Backend(format!("no Tokio runtime: {e}")))?;
        Ok(Self {
            adapter,
            devices,
            config,
            encoder: Arc::new(encoder),
            runtime,
        })
    }

    /// Finds the bluest device for `address`: scan cache first, then devices
    /// the OS already holds a connection to, then a short targeted scan.
    async fn resolve_device(
        adapter: &Adapter,
        devices: &DeviceCache,
        address: &DeviceAddress,
        resolve_timeout: Duration,
    ) -> Result<Device, TransportError> {
        if let Some(device) = devices.get(address) {
            return Ok(device);
        }

        for device in adapter.connected_devices().await? {
            if device_address(&device).as_ref() == Some(address) {
                info!("{address} is already connected at the OS level");
                devices.insert(address.clone(), device.clone());
                return Ok(device);
            }
        }

        info!(
            "{address} not seen yet, scanning for up to {}s",
            resolve_timeout.as_secs()
        );
        let mut scan_stream = adapter.scan(&[]).await?;
        let found = timeout(resolve_timeout, async {
            while let Some(found) = scan_stream.next().await {
                if device_address(&found.device).as_ref() == Some(address) {
                    return Some(found.device);
                }
            }
            None
        })
        .await;

        match found {
            Ok(Some(device)) => {
                devices.insert(address.clone(), device.clone());
                Ok(device)
            }
            _ => Err(TransportError::DeviceNotFound(address.to_string())),
        }
    }

    async fn link_task(
        adapter: Adapter,
        devices: DeviceCache,
        address: DeviceAddress,
        slot: Arc<Mutex<LinkSlot>>,
        events: LinkEventSender,
        cancel_token: CancellationToken,
        config: LinkConfig,
    ) {
        let resolve_timeout = Duration::from_secs(config.resolve_timeout_secs);
        let resolved = tokio::select! {
            r = Self::resolve_device(&adapter, &devices, &address, resolve_timeout) => r,
            () = cancel_token.cancelled() => return,
        };
        let device = match resolved {
            Ok(device) => device,
            Err(e) => {
                events.open_failed(e.to_string());
                return;
            }
        };
        slot.lock().unwrap_or_else(PoisonError::into_inner).device = Some(device.clone());

        let mut connection_events = match adapter.device_connection_events(&device).await {
            Ok(stream) => stream,
            Err(e) => {
                events.open_failed(e.to_string());
                return;
            }
        };

        if !device.is_connected().await {
            info!("Initiating connection to {address}...");
            let connect_timeout = Duration::from_secs(config.connect_timeout_secs);
            let outcome = tokio::select! {
                r = timeout(connect_timeout, adapter.connect_device(&device)) => r,
                () = cancel_token.cancelled() => return,
            };
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    events.open_failed(e.to_string());
                    return;
                }
                Err(_) => {
                    events.open_failed(format!(
                        "timed out after {}s",
                        config.connect_timeout_secs
                    ));
                    return;
                }
            }
        }
        info!("Connection to {address} successful");
        events.established();

        loop {
            tokio::select! {
                event = connection_events.next() => match event {
                    Some(ConnectionEvent::Connected) => {}
                    Some(ConnectionEvent::Disconnected) | None => {
                        info!("{address} disconnected");
                        events.lost();
                        break;
                    }
                },
                () = cancel_token.cancelled() => break,
            }
        }
    }

    async fn discovery_task(
        device: Device,
        slot: Arc<Mutex<LinkSlot>>,
        events: LinkEventSender,
        service_uuid: Uuid,
        char_uuid: Uuid,
    ) {
        match Self::find_write_characteristic(&device, service_uuid, char_uuid).await {
            Ok(characteristic) => {
                info!("Found command characteristic: {}", characteristic.uuid());
                slot.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .write_char = Some(characteristic);
                events.services_resolved(true);
            }
            Err(e) => {
                warn!("Command characteristic unavailable: {e}");
                events.services_resolved(false);
            }
        }
    }

    async fn find_write_characteristic(
        device: &Device,
        service_uuid: Uuid,
        char_uuid: Uuid,
    ) -> Result<Characteristic, TransportError> {
        let services = device.discover_services().await?;
        let service = services
            .iter()
            .find(|s| s.uuid() == service_uuid)
            .ok_or_else(|| {
                for service in &services {
                    debug!("Available service: {}", service.uuid());
                }
                TransportError::NotReady(format!("command service {service_uuid} not found"))
            })?;

        service
            .discover_characteristics()
            .await?
            .into_iter()
            .find(|c| c.uuid() == char_uuid)
            .ok_or_else(|| {
                TransportError::NotReady(format!("command characteristic {char_uuid} not found"))
            })
    }
}

impl<E: CommandEncoder> ConnectionTransport for BluestConnection<E> {
    type Handle = BluestLink;

    fn open(
        &self,
        address: &DeviceAddress,
        events: LinkEventSender,
    ) -> Result<BluestLink, TransportError> {
        let link = BluestLink {
            address: address.clone(),
            cancel_token: CancellationToken::new(),
            slot: Arc::new(Mutex::new(LinkSlot::default())),
            events: events.clone(),
        };
        self.runtime.spawn(Self::link_task(
            self.adapter.clone(),
            self.devices.clone(),
            address.clone(),
            link.slot.clone(),
            events,
            link.cancel_token.clone(),
            self.config.clone(),
        ));
        Ok(link)
    }

    fn close(&self, link: BluestLink) -> Result<(), TransportError> {
        link.cancel_token.cancel();
        let Some(device) = link.slot().device.take() else {
            debug!("Link to {} closed before the device was resolved", link.address);
            return Ok(());
        };

        let adapter = self.adapter.clone();
        let address = link.address;
        self.runtime.spawn(async move {
            if !device.is_connected().await {
                debug!("Device {address} not connected");
                return;
            }
            info!("Disconnecting from device {address}");
            match adapter.disconnect_device(&device).await {
                Ok(()) => info!("Successfully disconnected from {address}"),
                Err(e) => warn!("Failed to disconnect from {address}: {e}"),
            }
        });
        Ok(())
    }

    fn discover_services(&self, link: &BluestLink) -> Result<(), TransportError> {
        let device = link
            .slot()
            .device
            .clone()
            .ok_or_else(|| TransportError::NotReady("device not resolved".to_string()))?;
        info!("Discovering services on {}...", link.address);
        self.runtime.spawn(Self::discovery_task(
            device,
            link.slot.clone(),
            link.events.clone(),
            self.config.command_service_uuid,
            self.config.command_char_uuid,
        ));
        Ok(())
    }

    fn send(&self, link: &BluestLink, command: &CommandToken) -> Result<(), TransportError> {
        let characteristic = link.slot().write_char.clone().ok_or_else(|| {
            TransportError::NotReady("command characteristic not resolved yet".to_string())
        })?;
        let data = self.encoder.encode(command);
        let address = link.address.clone();
        let command = command.clone();
        self.runtime.spawn(async move {
            if let Err(e) = characteristic.write(&data).await {
                error!("Failed to write {command} to {address}: {e}");
            }
        });
        Ok(())
    }
}
