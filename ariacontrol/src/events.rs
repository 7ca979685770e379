//! Bus d'événements vers les consommateurs du tracker.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;

use crate::store::RootDescriptor;

/// Events delivered to the action-invocation/eventing layer and UI
/// bindings. The descriptor handles are read-only for consumers, and a
/// handle must not be retained across a [`TrackerEvent::DeviceRemoved`].
#[derive(Clone)]
pub enum TrackerEvent {
    /// All description documents of the device were fetched; the device is
    /// usable from this point on.
    DeviceAdded(Arc<RootDescriptor>),
    /// The device left the network (byebye, expiration or configuration
    /// change).
    DeviceRemoved(Arc<RootDescriptor>),
    /// The device rebooted without changing its configuration: event
    /// subscriptions at the device are stale and must be re-established.
    DeviceRebooted(Arc<RootDescriptor>),
}

/// Broadcast bus: each subscriber gets its own unbounded channel, sends
/// never block the protocol tasks, and subscribers that dropped their
/// receiver are pruned on the next broadcast.
#[derive(Clone, Default)]
pub struct TrackerEventBus {
    subscribers: Arc<Mutex<Vec<Sender<TrackerEvent>>>>,
}

impl TrackerEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<TrackerEvent> {
        let (tx, rx) = unbounded::<TrackerEvent>();
        self.subscribers.lock().push(tx);
        rx
    }

    pub(crate) fn broadcast(&self, event: TrackerEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}
