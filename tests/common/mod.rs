#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use scooter_link_lib::config::AppConfig;
use scooter_link_lib::config::last_device::MemoryStore;
use scooter_link_lib::core::TransportError;
use scooter_link_lib::core::bluetooth::transport::{
    ConnectionTransport, DiscoveryTransport, LinkEventSender,
};
use scooter_link_lib::core::bluetooth::types::Advertisement;
use scooter_link_lib::{CommandToken, CoreEvent, DeviceAddress, DeviceIdentity, ScooterManager};

pub const WAIT: Duration = Duration::from_secs(2);

pub type TestManager = ScooterManager<MockConnection, MockDiscovery, Arc<MemoryStore>>;

pub fn addr(raw: &str) -> DeviceAddress {
    DeviceAddress::parse(raw).expect("valid address")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Open(String),
    Close(usize),
    Discover(usize),
    Send { link: usize, address: String, command: CommandToken },
}

#[derive(Debug)]
pub struct MockLink {
    pub id: usize,
    pub address: DeviceAddress,
}

#[derive(Default)]
struct ConnectionInner {
    calls: Mutex<Vec<Call>>,
    links: Mutex<Vec<LinkEventSender>>,
    refuse_open: Mutex<Option<TransportError>>,
    refuse_send: Mutex<Option<TransportError>>,
    auto_establish: Mutex<bool>,
}

/// Connection transport that records calls. Link events are raised by the
/// test through [`MockConnection::link`], or immediately when
/// auto-establish is on.
#[derive(Clone, Default)]
pub struct MockConnection {
    inner: Arc<ConnectionInner>,
}

impl MockConnection {
    pub fn auto_establishing() -> Self {
        let mock = Self::default();
        *mock.inner.auto_establish.lock().expect("lock") = true;
        mock
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.calls.lock().expect("lock").clone()
    }

    pub fn sends(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Send { .. }))
            .collect()
    }

    pub fn opens(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Open(_)))
            .count()
    }

    pub fn closes_of(&self, link: usize) -> usize {
        self.calls()
            .iter()
            .filter(|c| **c == Call::Close(link))
            .count()
    }

    /// Event sender handed to the `index`th open.
    pub fn link(&self, index: usize) -> LinkEventSender {
        self.inner.links.lock().expect("lock")[index].clone()
    }

    pub fn refuse_open(&self, error: TransportError) {
        *self.inner.refuse_open.lock().expect("lock") = Some(error);
    }

    pub fn refuse_send(&self, error: TransportError) {
        *self.inner.refuse_send.lock().expect("lock") = Some(error);
    }

    fn record(&self, call: Call) {
        self.inner.calls.lock().expect("lock").push(call);
    }
}

impl ConnectionTransport for MockConnection {
    type Handle = MockLink;

    fn open(
        &self,
        address: &DeviceAddress,
        events: LinkEventSender,
    ) -> Result<MockLink, TransportError> {
        self.record(Call::Open(address.to_string()));
        if let Some(e) = self.inner.refuse_open.lock().expect("lock").clone() {
            return Err(e);
        }
        let mut links = self.inner.links.lock().expect("lock");
        let id = links.len();
        if *self.inner.auto_establish.lock().expect("lock") {
            events.established();
        }
        links.push(events);
        Ok(MockLink {
            id,
            address: address.clone(),
        })
    }

    fn close(&self, handle: MockLink) -> Result<(), TransportError> {
        self.record(Call::Close(handle.id));
        Ok(())
    }

    fn discover_services(&self, handle: &MockLink) -> Result<(), TransportError> {
        self.record(Call::Discover(handle.id));
        if *self.inner.auto_establish.lock().expect("lock") {
            self.link(handle.id).services_resolved(true);
        }
        Ok(())
    }

    fn send(&self, handle: &MockLink, command: &CommandToken) -> Result<(), TransportError> {
        if let Some(e) = self.inner.refuse_send.lock().expect("lock").clone() {
            return Err(e);
        }
        self.record(Call::Send {
            link: handle.id,
            address: handle.address.to_string(),
            command: command.clone(),
        });
        Ok(())
    }
}

#[derive(Default)]
struct DiscoveryInner {
    sender: Mutex<Option<mpsc::UnboundedSender<Advertisement>>>,
    starts: Mutex<usize>,
    stops: Mutex<usize>,
    refuse_start: Mutex<Option<TransportError>>,
}

/// Discovery transport fed by the test.
#[derive(Clone, Default)]
pub struct MockDiscovery {
    inner: Arc<DiscoveryInner>,
}

impl MockDiscovery {
    pub fn advertise(&self, address: &str, name: Option<&str>, rssi: Option<i16>) {
        let identity = DeviceIdentity::new(addr(address), name.map(str::to_string));
        if let Some(tx) = self.inner.sender.lock().expect("lock").as_ref() {
            let _ = tx.send(Advertisement::new(identity, rssi));
        }
    }

    /// Ends the advert stream.
    pub fn finish(&self) {
        self.inner.sender.lock().expect("lock").take();
    }

    pub fn starts(&self) -> usize {
        *self.inner.starts.lock().expect("lock")
    }

    pub fn stops(&self) -> usize {
        *self.inner.stops.lock().expect("lock")
    }

    pub fn refuse_start(&self, error: TransportError) {
        *self.inner.refuse_start.lock().expect("lock") = Some(error);
    }
}

#[async_trait]
impl DiscoveryTransport for MockDiscovery {
    async fn start(&self) -> Result<mpsc::UnboundedReceiver<Advertisement>, TransportError> {
        if let Some(e) = self.inner.refuse_start.lock().expect("lock").clone() {
            return Err(e);
        }
        *self.inner.starts.lock().expect("lock") += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        *self.inner.sender.lock().expect("lock") = Some(tx);
        Ok(rx)
    }

    async fn stop(&self) -> Result<(), TransportError> {
        *self.inner.stops.lock().expect("lock") += 1;
        self.inner.sender.lock().expect("lock").take();
        Ok(())
    }
}

pub struct Harness {
    pub manager: TestManager,
    pub connection: MockConnection,
    pub discovery: MockDiscovery,
    pub store: Arc<MemoryStore>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(MockConnection::default(), AppConfig::default())
    }

    pub fn with(connection: MockConnection, config: AppConfig) -> Self {
        let discovery = MockDiscovery::default();
        let store = Arc::new(MemoryStore::new());
        let manager =
            ScooterManager::new(connection.clone(), discovery.clone(), store.clone(), &config);
        Self {
            manager,
            connection,
            discovery,
            store,
        }
    }
}

/// Receives events until one matches `predicate`.
pub async fn next_matching<F>(
    events: &mut broadcast::Receiver<CoreEvent>,
    mut predicate: F,
) -> CoreEvent
where
    F: FnMut(&CoreEvent) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("expected event did not arrive")
}
