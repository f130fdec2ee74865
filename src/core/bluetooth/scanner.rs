use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::config::scan_config::ScanConfig;
use crate::core::bluetooth::shared::{EventSink, SharedState, lock};
use crate::core::bluetooth::transport::DiscoveryTransport;
use crate::core::bluetooth::types::{Advertisement, CoreEvent};
use crate::core::error::Result;

/// Drops adverts the operator is not interested in.
#[derive(Debug, Clone, Default)]
pub struct ScanFilter {
    name_contains: Option<String>,
    min_rssi: Option<i16>,
}

impl ScanFilter {
    pub fn new(name_contains: Option<String>, min_rssi: Option<i16>) -> Self {
        let name_contains = name_contains
            .map(|n| n.trim().to_lowercase())
            .filter(|n| !n.is_empty());
        Self {
            name_contains,
            min_rssi,
        }
    }

    pub fn from_config(config: &ScanConfig) -> Self {
        Self::new(config.name_filter.clone(), config.min_rssi)
    }

    pub fn accepts(&self, advert: &Advertisement) -> bool {
        if let Some(min) = self.min_rssi {
            match advert.rssi {
                Some(rssi) if rssi >= min => {}
                _ => return false,
            }
        }
        match &self.name_contains {
            Some(needle) => advert
                .identity
                .name
                .as_ref()
                .is_some_and(|name| name.to_lowercase().contains(needle)),
            None => true,
        }
    }
}

/// Drives discovery and feeds the registry. A scan runs until
/// [`stop_scan`](Self::stop_scan), its timeout, or the end of the advert
/// stream.
pub struct ScanController<D, H> {
    discovery: Arc<D>,
    shared: SharedState<H>,
    sink: EventSink,
    filter: ScanFilter,
    timeout: Option<Duration>,
    cancel_token: CancellationToken,
    scan_task_handle: Option<JoinHandle<()>>,
}

impl<D, H> ScanController<D, H>
where
    D: DiscoveryTransport,
    H: Send + 'static,
{
    /// A zero `timeout` means scans only end on `stop_scan`.
    pub fn new(
        discovery: Arc<D>,
        shared: SharedState<H>,
        sink: EventSink,
        filter: ScanFilter,
        timeout: Duration,
    ) -> Self {
        Self {
            discovery,
            shared,
            sink,
            filter,
            timeout: (!timeout.is_zero()).then_some(timeout),
            cancel_token: CancellationToken::new(),
            scan_task_handle: None,
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.scan_task_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub async fn start_scan(&mut self) -> Result<()> {
        if self.scan_task_handle.is_some() {
            self.stop_scan().await;
        }
        lock(&self.shared).registry.clear();

        let adverts = self.discovery.start().await.map_err(|e| {
            error!("Failed to start discovery: {e}");
            e.into_scan_error()
        })?;

        self.cancel_token = CancellationToken::new();
        self.sink.emit(CoreEvent::ScanStarted);

        let handle = tokio::spawn(Self::internal_scan_task(
            self.discovery.clone(),
            self.shared.clone(),
            self.sink.clone(),
            self.filter.clone(),
            adverts,
            self.cancel_token.clone(),
            self.timeout.map(|t| Instant::now() + t),
        ));
        self.scan_task_handle = Some(handle);

        info!("Device scan task started.");
        Ok(())
    }

    /// Stops the running scan, if any, and waits for its task to finish.
    /// Returns whether a scan was running.
    pub async fn stop_scan(&mut self) -> bool {
        self.cancel_token.cancel();

        let Some(handle) = self.scan_task_handle.take() else {
            debug!("No active scan task to stop.");
            return false;
        };
        let running = !handle.is_finished();
        info!("Stopping Bluetooth scan.");
        if let Err(e) = handle.await {
            if e.is_cancelled() {
                info!("Scan task was cancelled.");
            } else {
                error!("Scan task finished with an unexpected join error: {e:?}");
            }
        }
        running
    }

    async fn internal_scan_task(
        discovery: Arc<D>,
        shared: SharedState<H>,
        sink: EventSink,
        filter: ScanFilter,
        mut adverts: mpsc::UnboundedReceiver<Advertisement>,
        cancel_token: CancellationToken,
        deadline: Option<Instant>,
    ) {
        loop {
            tokio::select! {
                advert = adverts.recv() => match advert {
                    Some(advert) => Self::record(&shared, &sink, &filter, advert),
                    None => {
                        info!("Discovery stream has ended.");
                        break;
                    }
                },
                () = cancel_token.cancelled() => break,
                () = wait_until(deadline) => {
                    info!("Scan timed out.");
                    break;
                }
            }
        }

        if let Err(e) = discovery.stop().await {
            warn!("Failed to stop discovery: {e}");
        }
        let found = lock(&shared).registry.len();
        info!("Scan finished, {found} device(s) found.");
        sink.emit(CoreEvent::ScanStopped { found });
    }

    fn record(
        shared: &SharedState<H>,
        sink: &EventSink,
        filter: &ScanFilter,
        advert: Advertisement,
    ) {
        if !filter.accepts(&advert) {
            debug!("Filtered out advert from {} (RSSI {:?})", advert.identity, advert.rssi);
            return;
        }
        let identity = advert.identity;
        let inserted = lock(shared).registry.insert(identity.clone());
        if inserted {
            info!("Found device: {identity}, RSSI: {:?}", advert.rssi);
            sink.emit(CoreEvent::DeviceFound(identity));
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::types::{DeviceAddress, DeviceIdentity};

    fn advert(address: &str, name: Option<&str>, rssi: Option<i16>) -> Advertisement {
        Advertisement::new(
            DeviceIdentity::new(
                DeviceAddress::parse(address).expect("valid address"),
                name.map(str::to_string),
            ),
            rssi,
        )
    }

    #[test]
    fn default_filter_accepts_everything() {
        let filter = ScanFilter::default();
        assert!(filter.accepts(&advert("AA:BB", None, None)));
    }

    #[test]
    fn rssi_threshold_drops_weak_and_unknown_signals() {
        let filter = ScanFilter::new(None, Some(-70));
        assert!(filter.accepts(&advert("AA:BB", None, Some(-60))));
        assert!(filter.accepts(&advert("AA:BB", None, Some(-70))));
        assert!(!filter.accepts(&advert("AA:BB", None, Some(-80))));
        assert!(!filter.accepts(&advert("AA:BB", None, None)));
    }

    #[test]
    fn name_filter_is_case_insensitive() {
        let filter = ScanFilter::new(Some(" Scooter ".into()), None);
        assert!(filter.accepts(&advert("AA:BB", Some("MiScooter3"), None)));
        assert!(!filter.accepts(&advert("AA:BB", Some("Headphones"), None)));
        assert!(!filter.accepts(&advert("AA:BB", None, None)));
    }
}
