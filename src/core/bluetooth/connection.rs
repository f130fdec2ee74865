//! Connection lifecycle for the scooter link
//! This module holds the session state machine: which device is targeted,
//! where the link stands, and the transport handle while one is open.

use std::mem;

use log::{debug, error, info, warn};
use tokio::sync::mpsc;

use crate::core::bluetooth::transport::{ConnectionTransport, LinkEventSender, LinkSignal};
use crate::core::bluetooth::types::{ConnectionState, DeviceIdentity, LinkEvent, SessionStatus};
use crate::core::error::{CoreError, Result};

/// Where the link stands. The handle only exists while a link is being
/// opened or is up.
enum Phase<H> {
    Idle,
    Connecting(H),
    Connected(H),
}

/// Result of applying one link event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    Changed,
    /// The link never came up; the session is back to idle.
    Failed(CoreError),
}

/// Owns at most one transport handle. Opening a new link always closes the
/// previous one first.
pub struct ConnectionSession<H> {
    phase: Phase<H>,
    target: Option<DeviceIdentity>,
    generation: u64,
    services_ready: bool,
    last_failure: Option<String>,
}

impl<H> Default for ConnectionSession<H> {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            target: None,
            generation: 0,
            services_ready: false,
            last_failure: None,
        }
    }
}

impl<H> ConnectionSession<H> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConnectionState {
        match self.phase {
            Phase::Idle => ConnectionState::Idle,
            Phase::Connecting(_) => ConnectionState::Connecting,
            Phase::Connected(_) => ConnectionState::Connected,
        }
    }

    pub fn target(&self) -> Option<&DeviceIdentity> {
        self.target.as_ref()
    }

    /// Generation of the most recent `connect`; link events carrying any
    /// other generation are ignored.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn has_handle(&self) -> bool {
        !matches!(self.phase, Phase::Idle)
    }

    /// The handle, only while the link is up.
    pub fn connected_handle(&self) -> Option<&H> {
        match &self.phase {
            Phase::Connected(handle) => Some(handle),
            _ => None,
        }
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.state(),
            target: self.target.clone(),
            services_ready: self.services_ready,
            last_failure: self.last_failure.clone(),
        }
    }

    /// Tears down any current link and starts opening one to `identity`.
    /// Returns once the transport has accepted the request.
    pub fn connect<C>(
        &mut self,
        identity: DeviceIdentity,
        transport: &C,
        link_tx: &mpsc::UnboundedSender<LinkSignal>,
    ) -> Result<()>
    where
        C: ConnectionTransport<Handle = H>,
    {
        self.release(transport);

        self.generation += 1;
        self.services_ready = false;
        self.last_failure = None;
        info!("Connecting to {identity}...");

        let events = LinkEventSender::new(self.generation, link_tx.clone());
        let opened = transport.open(&identity.address, events);
        let address = identity.address.to_string();
        self.target = Some(identity);

        match opened {
            Ok(handle) => {
                self.phase = Phase::Connecting(handle);
                Ok(())
            }
            Err(e) => {
                error!("Failed to open link to {address}: {e}");
                let err = e.into_connect_error(&address);
                self.last_failure = Some(err.to_string());
                Err(err)
            }
        }
    }

    /// Applies one link event from the transport.
    pub fn apply<C>(&mut self, signal: LinkSignal, transport: &C) -> Transition
    where
        C: ConnectionTransport<Handle = H>,
    {
        if signal.generation != self.generation {
            debug!(
                "Ignoring {:?} from superseded link (generation {}, current {})",
                signal.event, signal.generation, self.generation
            );
            return Transition::Unchanged;
        }

        match signal.event {
            LinkEvent::Established => match mem::replace(&mut self.phase, Phase::Idle) {
                Phase::Connecting(handle) => {
                    info!("Link established, discovering services...");
                    if let Err(e) = transport.discover_services(&handle) {
                        warn!("Service discovery request failed: {e}");
                    }
                    self.phase = Phase::Connected(handle);
                    Transition::Changed
                }
                other => {
                    self.phase = other;
                    Transition::Unchanged
                }
            },
            LinkEvent::Lost => match self.state() {
                ConnectionState::Idle => Transition::Unchanged,
                ConnectionState::Connecting => {
                    self.fail(transport, "link lost before it was established".to_string())
                }
                ConnectionState::Connected => {
                    info!("Link lost");
                    self.release(transport);
                    Transition::Changed
                }
            },
            LinkEvent::OpenFailed(reason) => match self.state() {
                ConnectionState::Connecting => self.fail(transport, reason),
                _ => Transition::Unchanged,
            },
            LinkEvent::ServicesResolved(ready) => {
                if self.state() != ConnectionState::Connected || self.services_ready == ready {
                    return Transition::Unchanged;
                }
                if ready {
                    info!("Command service resolved");
                } else {
                    warn!("Command service not found on device");
                }
                self.services_ready = ready;
                Transition::Changed
            }
        }
    }

    /// Closes the current link without opening another. Returns whether
    /// there was anything to close.
    pub fn disconnect<C>(&mut self, transport: &C) -> bool
    where
        C: ConnectionTransport<Handle = H>,
    {
        if !self.has_handle() {
            return false;
        }
        // Late events from the closed link must not revive it.
        self.generation += 1;
        self.release(transport);
        true
    }

    fn fail<C>(&mut self, transport: &C, reason: String) -> Transition
    where
        C: ConnectionTransport<Handle = H>,
    {
        self.release(transport);
        let address = self
            .target
            .as_ref()
            .map(|t| t.address.to_string())
            .unwrap_or_default();
        warn!("Connection to {address} failed: {reason}");
        self.last_failure = Some(reason.clone());
        Transition::Failed(CoreError::ConnectFailed { address, reason })
    }

    fn release<C>(&mut self, transport: &C)
    where
        C: ConnectionTransport<Handle = H>,
    {
        self.services_ready = false;
        let handle = match mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Idle => return,
            Phase::Connecting(handle) | Phase::Connected(handle) => handle,
        };
        if let Some(target) = &self.target {
            info!("Closing link to {}", target.address);
        }
        if let Err(e) = transport.close(handle) {
            warn!("Failed to close link: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::core::bluetooth::commands::CommandToken;
    use crate::core::bluetooth::types::DeviceAddress;
    use crate::core::error::TransportError;

    /// Records every call; handles are the address they were opened for.
    #[derive(Default)]
    struct RecordingTransport {
        calls: Mutex<Vec<String>>,
        refuse_open: Option<TransportError>,
    }

    impl RecordingTransport {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().expect("calls lock").clone()
        }

        fn record(&self, call: String) {
            self.calls.lock().expect("calls lock").push(call);
        }
    }

    impl ConnectionTransport for RecordingTransport {
        type Handle = String;

        fn open(
            &self,
            address: &DeviceAddress,
            _events: LinkEventSender,
        ) -> std::result::Result<String, TransportError> {
            self.record(format!("open {address}"));
            match &self.refuse_open {
                Some(e) => Err(e.clone()),
                None => Ok(address.to_string()),
            }
        }

        fn close(&self, handle: String) -> std::result::Result<(), TransportError> {
            self.record(format!("close {handle}"));
            Ok(())
        }

        fn discover_services(&self, handle: &String) -> std::result::Result<(), TransportError> {
            self.record(format!("discover {handle}"));
            Ok(())
        }

        fn send(
            &self,
            handle: &String,
            command: &CommandToken,
        ) -> std::result::Result<(), TransportError> {
            self.record(format!("send {handle} {command}"));
            Ok(())
        }
    }

    fn identity(address: &str) -> DeviceIdentity {
        DeviceIdentity::from_address(DeviceAddress::parse(address).expect("valid address"))
    }

    fn signal(generation: u64, event: LinkEvent) -> LinkSignal {
        LinkSignal { generation, event }
    }

    fn channel() -> mpsc::UnboundedSender<LinkSignal> {
        mpsc::unbounded_channel().0
    }

    #[test]
    fn starts_idle_without_handle() {
        let session: ConnectionSession<String> = ConnectionSession::new();
        assert_eq!(session.state(), ConnectionState::Idle);
        assert!(!session.has_handle());
        assert!(session.target().is_none());
    }

    #[test]
    fn connect_then_established_discovers_services() {
        let transport = RecordingTransport::default();
        let mut session = ConnectionSession::new();
        session
            .connect(identity("AA:BB"), &transport, &channel())
            .expect("open accepted");
        assert_eq!(session.state(), ConnectionState::Connecting);
        assert!(session.has_handle());
        assert!(session.connected_handle().is_none());

        let outcome = session.apply(signal(1, LinkEvent::Established), &transport);
        assert_eq!(outcome, Transition::Changed);
        assert_eq!(session.state(), ConnectionState::Connected);
        assert_eq!(session.connected_handle().map(String::as_str), Some("AA:BB"));
        assert_eq!(transport.calls(), vec!["open AA:BB", "discover AA:BB"]);
    }

    #[test]
    fn superseding_connect_closes_previous_handle_once() {
        let transport = RecordingTransport::default();
        let mut session = ConnectionSession::new();
        let tx = channel();
        session.connect(identity("AA:BB"), &transport, &tx).expect("open A");
        session.connect(identity("CC:DD"), &transport, &tx).expect("open B");

        // A confirms late; it must not touch B's session.
        assert_eq!(
            session.apply(signal(1, LinkEvent::Established), &transport),
            Transition::Unchanged
        );
        assert_eq!(
            session.apply(signal(1, LinkEvent::Lost), &transport),
            Transition::Unchanged
        );

        assert_eq!(session.state(), ConnectionState::Connecting);
        assert_eq!(session.target(), Some(&identity("CC:DD")));
        assert_eq!(
            transport.calls(),
            vec!["open AA:BB", "close AA:BB", "open CC:DD"]
        );
    }

    #[test]
    fn link_lost_returns_to_idle_and_keeps_target() {
        let transport = RecordingTransport::default();
        let mut session = ConnectionSession::new();
        session.connect(identity("AA:BB"), &transport, &channel()).expect("open");
        session.apply(signal(1, LinkEvent::Established), &transport);

        assert_eq!(session.apply(signal(1, LinkEvent::Lost), &transport), Transition::Changed);
        assert_eq!(session.state(), ConnectionState::Idle);
        assert!(!session.has_handle());
        assert_eq!(session.status().to_string(), "Disconnected from AA:BB");
        assert_eq!(transport.calls().last().map(String::as_str), Some("close AA:BB"));
    }

    #[test]
    fn open_failure_reverts_to_idle_with_reason() {
        let transport = RecordingTransport::default();
        let mut session = ConnectionSession::new();
        session.connect(identity("AA:BB"), &transport, &channel()).expect("open");

        let failed = signal(1, LinkEvent::OpenFailed("timed out".into()));
        let outcome = session.apply(failed, &transport);
        assert_eq!(
            outcome,
            Transition::Failed(CoreError::ConnectFailed {
                address: "AA:BB".into(),
                reason: "timed out".into(),
            })
        );
        assert_eq!(session.state(), ConnectionState::Idle);
        assert_eq!(session.status().last_failure.as_deref(), Some("timed out"));
    }

    #[test]
    fn refused_open_leaves_session_idle() {
        let transport = RecordingTransport {
            refuse_open: Some(TransportError::PermissionDenied("BLUETOOTH_CONNECT".into())),
            ..Default::default()
        };
        let mut session = ConnectionSession::new();
        let err = session
            .connect(identity("AA:BB"), &transport, &channel())
            .expect_err("open refused");
        assert_eq!(err, CoreError::PermissionDenied("BLUETOOTH_CONNECT".into()));
        assert_eq!(session.state(), ConnectionState::Idle);
        assert!(!session.has_handle());
    }

    #[test]
    fn services_resolved_only_counts_while_connected() {
        let transport = RecordingTransport::default();
        let mut session = ConnectionSession::new();
        session.connect(identity("AA:BB"), &transport, &channel()).expect("open");
        assert_eq!(
            session.apply(signal(1, LinkEvent::ServicesResolved(true)), &transport),
            Transition::Unchanged
        );

        session.apply(signal(1, LinkEvent::Established), &transport);
        assert_eq!(
            session.apply(signal(1, LinkEvent::ServicesResolved(true)), &transport),
            Transition::Changed
        );
        assert!(session.status().services_ready);
    }

    #[test]
    fn disconnect_closes_and_ignores_late_events() {
        let transport = RecordingTransport::default();
        let mut session = ConnectionSession::new();
        session.connect(identity("AA:BB"), &transport, &channel()).expect("open");

        assert!(session.disconnect(&transport));
        assert!(!session.disconnect(&transport));
        assert_eq!(
            session.apply(signal(1, LinkEvent::Established), &transport),
            Transition::Unchanged
        );
        assert_eq!(session.state(), ConnectionState::Idle);
        assert_eq!(transport.calls(), vec!["open AA:BB", "close AA:BB"]);
    }
}
