//! Seams between the core and the radio.
//!
//! The core never touches a platform Bluetooth API directly. Discovery hands
//! back a channel of adverts; connection returns an opaque handle and
//! reports link changes through a [`LinkEventSender`]. The bluest backed
//! implementations live in [`super::bluest_transport`].

use async_trait::async_trait;
use log::debug;
use tokio::sync::mpsc;

use crate::core::bluetooth::commands::CommandToken;
use crate::core::bluetooth::types::{Advertisement, DeviceAddress, LinkEvent};
use crate::core::error::TransportError;

/// A link event tagged with the session generation that opened the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSignal {
    pub generation: u64,
    pub event: LinkEvent,
}

/// Handed to [`ConnectionTransport::open`]; the only way a transport may
/// report link changes back to the session.
#[derive(Debug, Clone)]
pub struct LinkEventSender {
    generation: u64,
    tx: mpsc::UnboundedSender<LinkSignal>,
}

impl LinkEventSender {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<LinkSignal>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn established(&self) {
        self.post(LinkEvent::Established);
    }

    pub fn lost(&self) {
        self.post(LinkEvent::Lost);
    }

    pub fn open_failed(&self, reason: impl Into<String>) {
        self.post(LinkEvent::OpenFailed(reason.into()));
    }

    pub fn services_resolved(&self, ready: bool) {
        self.post(LinkEvent::ServicesResolved(ready));
    }

    fn post(&self, event: LinkEvent) {
        let signal = LinkSignal {
            generation: self.generation,
            event,
        };
        if self.tx.send(signal).is_err() {
            debug!("Link event dropped, session is gone");
        }
    }
}

/// Source of advertisements.
#[async_trait]
pub trait DiscoveryTransport: Send + Sync + 'static {
    /// Starts discovery. Adverts arrive on the returned channel until
    /// [`stop`](Self::stop) is called or the sender side is dropped.
    async fn start(&self) -> Result<mpsc::UnboundedReceiver<Advertisement>, TransportError>;

    async fn stop(&self) -> Result<(), TransportError>;
}

/// Opens and drives links to peripherals. Every call returns without waiting
/// on the radio; progress is reported through the [`LinkEventSender`].
pub trait ConnectionTransport: Send + Sync + 'static {
    type Handle: Send + 'static;

    fn open(
        &self,
        address: &DeviceAddress,
        events: LinkEventSender,
    ) -> Result<Self::Handle, TransportError>;

    fn close(&self, handle: Self::Handle) -> Result<(), TransportError>;

    /// Requests service and characteristic discovery on an established link.
    fn discover_services(&self, handle: &Self::Handle) -> Result<(), TransportError>;

    /// Fire-and-forget write of one command.
    fn send(&self, handle: &Self::Handle, command: &CommandToken) -> Result<(), TransportError>;
}

/// Turns a command token into the bytes written to the vehicle.
pub trait CommandEncoder: Send + Sync + 'static {
    fn encode(&self, command: &CommandToken) -> Vec<u8>;
}

/// Writes the token name as ASCII.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextEncoder;

impl CommandEncoder for PlainTextEncoder {
    fn encode(&self, command: &CommandToken) -> Vec<u8> {
        command.as_str().as_bytes().to_vec()
    }
}
