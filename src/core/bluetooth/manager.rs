//! Scooter link manager
//! This module provides the main interface for scanning, connecting and
//! commanding the scooter. Shells only talk to [`ScooterManager`].

use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::{Mutex as AsyncMutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::config::last_device::{KeyValueStore, LastDeviceStore};
use crate::core::bluetooth::commands::{CommandDispatcher, CommandToken};
use crate::core::bluetooth::connection::Transition;
use crate::core::bluetooth::constants::EVENT_CHANNEL_CAPACITY;
use crate::core::bluetooth::scanner::{ScanController, ScanFilter};
use crate::core::bluetooth::shared::{CoreState, EventSink, SharedState, lock};
use crate::core::bluetooth::transport::{ConnectionTransport, DiscoveryTransport, LinkSignal};
use crate::core::bluetooth::types::{CoreEvent, DeviceAddress, DeviceIdentity, SessionStatus};
use crate::core::error::{CoreError, Result};

/// Owns the registry, the session and the scan. Every mutation of the
/// registry or the session happens under one lock; transport callbacks are
/// funnelled through a single pump task.
pub struct ScooterManager<C, D, S>
where
    C: ConnectionTransport,
{
    shared: SharedState<C::Handle>,
    connection: Arc<C>,
    scanner: AsyncMutex<ScanController<D, C::Handle>>,
    dispatcher: CommandDispatcher,
    last_device: LastDeviceStore<S>,
    sink: EventSink,
    link_tx: mpsc::UnboundedSender<LinkSignal>,
    pump_cancel: CancellationToken,
    pump_handle: Mutex<Option<JoinHandle<()>>>,
}

impl<C, D, S> ScooterManager<C, D, S>
where
    C: ConnectionTransport,
    D: DiscoveryTransport,
    S: KeyValueStore,
{
    /// Creates a manager and starts its link pump.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn new(connection: C, discovery: D, store: S, config: &AppConfig) -> Self {
        let shared: SharedState<C::Handle> = Arc::new(Mutex::new(CoreState::default()));
        let connection = Arc::new(connection);
        let sink = EventSink::new(EVENT_CHANNEL_CAPACITY);
        let scanner = ScanController::new(
            Arc::new(discovery),
            shared.clone(),
            sink.clone(),
            ScanFilter::from_config(&config.scan),
            Duration::from_secs(config.scan.timeout_secs),
        );

        let (link_tx, link_rx) = mpsc::unbounded_channel();
        let pump_cancel = CancellationToken::new();
        let pump_handle = tokio::spawn(Self::link_pump(
            shared.clone(),
            connection.clone(),
            sink.clone(),
            link_rx,
            pump_cancel.clone(),
        ));

        Self {
            shared,
            connection,
            scanner: AsyncMutex::new(scanner),
            dispatcher: CommandDispatcher::with_extensions(config.link.extra_commands.clone()),
            last_device: LastDeviceStore::new(store),
            sink,
            link_tx,
            pump_cancel,
            pump_handle: Mutex::new(Some(pump_handle)),
        }
    }

    /// Clears the device list and starts discovery.
    pub async fn start_scan(&self) -> Result<()> {
        let result = self.scanner.lock().await.start_scan().await;
        self.report(result)
    }

    /// Returns whether a scan was running.
    pub async fn stop_scan(&self) -> bool {
        self.scanner.lock().await.stop_scan().await
    }

    pub async fn is_scanning(&self) -> bool {
        self.scanner.lock().await.is_scanning()
    }

    /// Devices found by the current scan, first seen first.
    pub fn devices(&self) -> Vec<DeviceIdentity> {
        lock(&self.shared).registry.devices().to_vec()
    }

    /// Starts connecting to `identity`, replacing any current link. Returns
    /// once the open has been initiated; follow progress through
    /// [`watch_status`](Self::watch_status).
    pub fn connect(&self, identity: DeviceIdentity) -> Result<()> {
        let mut state = lock(&self.shared);
        let result = state
            .session
            .connect(identity, self.connection.as_ref(), &self.link_tx);
        self.sink.publish_status(state.session.status());
        drop(state);
        self.report(result)
    }

    /// Operator picked `address` from the list: remember it, then connect.
    pub fn select_device(&self, address: &DeviceAddress) -> Result<()> {
        let identity = self.identity_for(address);
        info!("Selected device {identity}");
        self.last_device.save(address);
        self.connect(identity)
    }

    /// Connects to the device saved by the last selection.
    pub fn auto_connect_last(&self) -> Result<DeviceAddress> {
        let Some(address) = self.last_device.load() else {
            info!("No saved device to reconnect to");
            return self.report(Err(CoreError::NoSavedDevice));
        };
        info!("Reconnecting to last device {address}");
        self.connect(self.identity_for(&address))?;
        Ok(address)
    }

    /// Sends `token` over the current link.
    pub fn dispatch(&self, token: &str) -> Result<CommandToken> {
        let result = {
            let state = lock(&self.shared);
            self.dispatcher
                .dispatch(&state.session, self.connection.as_ref(), token)
        };
        if let Ok(command) = &result {
            self.sink.emit(CoreEvent::CommandSent(command.clone()));
        }
        self.report(result)
    }

    /// Closes the current link, if any, without opening another.
    pub fn disconnect(&self) -> bool {
        let mut state = lock(&self.shared);
        let closed = state.session.disconnect(self.connection.as_ref());
        if closed {
            info!("Disconnected on request");
            self.sink.publish_status(state.session.status());
        }
        closed
    }

    pub fn status(&self) -> SessionStatus {
        lock(&self.shared).session.status()
    }

    pub fn last_device(&self) -> Option<DeviceAddress> {
        self.last_device.load()
    }

    pub fn known_commands(&self) -> Vec<CommandToken> {
        self.dispatcher.known_tokens()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.sink.subscribe()
    }

    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.sink.watch_status()
    }

    /// Waits until the status satisfies `predicate`, giving up after
    /// `timeout`. Returns the matching status.
    pub async fn wait_for_status<F>(&self, timeout: Duration, predicate: F) -> Option<SessionStatus>
    where
        F: FnMut(&SessionStatus) -> bool,
    {
        let mut rx = self.watch_status();
        match tokio::time::timeout(timeout, rx.wait_for(predicate)).await {
            Ok(Ok(status)) => Some(status.clone()),
            _ => None,
        }
    }

    /// Stops scanning, closes the link and stops the pump.
    pub async fn shutdown(&self) {
        self.stop_scan().await;
        self.disconnect();
        self.pump_cancel.cancel();
        let handle = self
            .pump_handle
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Link pump finished with an error: {e:?}");
            }
        }
        info!("Scooter manager shut down");
    }

    fn identity_for(&self, address: &DeviceAddress) -> DeviceIdentity {
        lock(&self.shared)
            .registry
            .get(address)
            .cloned()
            .unwrap_or_else(|| DeviceIdentity::from_address(address.clone()))
    }

    fn report<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.sink.emit(CoreEvent::Failure(e.clone()));
        }
        result
    }

    async fn link_pump(
        shared: SharedState<C::Handle>,
        connection: Arc<C>,
        sink: EventSink,
        mut link_rx: mpsc::UnboundedReceiver<LinkSignal>,
        cancel: CancellationToken,
    ) {
        loop {
            let signal = tokio::select! {
                signal = link_rx.recv() => match signal {
                    Some(signal) => signal,
                    None => break,
                },
                () = cancel.cancelled() => break,
            };
            debug!("Link event: {signal:?}");

            {
                let mut state = lock(&shared);
                match state.session.apply(signal, connection.as_ref()) {
                    Transition::Unchanged => {}
                    Transition::Changed => sink.publish_status(state.session.status()),
                    Transition::Failed(e) => {
                        sink.publish_status(state.session.status());
                        sink.emit(CoreEvent::Failure(e));
                    }
                }
            }
        }
        debug!("Link pump stopped");
    }
}

impl<C, D, S> Drop for ScooterManager<C, D, S>
where
    C: ConnectionTransport,
{
    fn drop(&mut self) {
        self.pump_cancel.cancel();
    }
}
