//! State shared between the manager, the scan task and the link pump.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::debug;
use tokio::sync::{broadcast, watch};

use crate::core::bluetooth::connection::ConnectionSession;
use crate::core::bluetooth::registry::DeviceRegistry;
use crate::core::bluetooth::types::{CoreEvent, SessionStatus};

/// Everything that must change under one lock: the scan results and the
/// session.
pub struct CoreState<H> {
    pub registry: DeviceRegistry,
    pub session: ConnectionSession<H>,
}

impl<H> Default for CoreState<H> {
    fn default() -> Self {
        Self {
            registry: DeviceRegistry::new(),
            session: ConnectionSession::new(),
        }
    }
}

pub type SharedState<H> = Arc<Mutex<CoreState<H>>>;

/// Locks the shared state. A panic while holding the lock leaves plain data
/// behind, so a poisoned lock is still usable.
pub fn lock<H>(shared: &Mutex<CoreState<H>>) -> MutexGuard<'_, CoreState<H>> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Fan-out of core notifications.
#[derive(Clone)]
pub struct EventSink {
    events: broadcast::Sender<CoreEvent>,
    status: Arc<watch::Sender<SessionStatus>>,
}

impl EventSink {
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        let (status, _) = watch::channel(SessionStatus::default());
        Self {
            events,
            status: Arc::new(status),
        }
    }

    pub fn emit(&self, event: CoreEvent) {
        if self.events.send(event).is_err() {
            debug!("No subscribers for core event");
        }
    }

    /// Publishes a new status on the watch channel and as an event. Call
    /// with the state lock held so statuses go out in order.
    pub fn publish_status(&self, status: SessionStatus) {
        self.status.send_replace(status.clone());
        self.emit(CoreEvent::StatusChanged(status));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.events.subscribe()
    }

    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }
}
