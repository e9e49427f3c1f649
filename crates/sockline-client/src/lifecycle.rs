//! Connection lifecycle notifications.
//!
//! Events go out on a `tokio::sync::broadcast` channel. The [`Notifier`]
//! remembers the last value emitted per event name and suppresses repeats,
//! so subscribers see `ConnectionState(false)` once per outage, not once
//! per detach.

use std::collections::HashMap;

use tokio::sync::broadcast;

/// Capacity of the lifecycle broadcast channel.
pub const LIFECYCLE_CHANNEL_CAPACITY: usize = 64;

/// A lifecycle notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// `true` once a handshake succeeds, `false` when the socket goes away.
    ConnectionState(bool),
}

impl LifecycleEvent {
    /// Event name used for duplicate suppression.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ConnectionState(_) => "connectionState",
        }
    }
}

/// Deduplicating broadcaster.
#[derive(Debug)]
pub(crate) struct Notifier {
    tx: broadcast::Sender<LifecycleEvent>,
    last_emitted: HashMap<&'static str, LifecycleEvent>,
}

impl Notifier {
    pub(crate) fn new(tx: broadcast::Sender<LifecycleEvent>) -> Self {
        Self {
            tx,
            last_emitted: HashMap::new(),
        }
    }

    /// Broadcast `event` unless it equals the last one of its name.
    ///
    /// Returns whether the event went out.
    pub(crate) fn emit(&mut self, event: LifecycleEvent) -> bool {
        if self.last_emitted.get(event.name()) == Some(&event) {
            return false;
        }
        let _ = self.last_emitted.insert(event.name(), event);
        // No subscribers is not an error
        let _ = self.tx.send(event);
        true
    }

    pub(crate) fn sender(&self) -> &broadcast::Sender<LifecycleEvent> {
        &self.tx
    }
}
