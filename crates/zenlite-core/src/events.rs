//! Session-level event broadcast.
//!
//! Where a [`Listener`](crate::Listener) receives every event of one device,
//! the session bus carries the few events that concern the session as a
//! whole: discoveries, connectivity transitions and routing anomalies. Any
//! number of tasks may [`subscribe`](EventBus::subscribe); slow subscribers
//! lag and lose the oldest events rather than blocking the dispatcher.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use zenlite_types::Connectivity;

use crate::error::DispatchError;

/// Default capacity of the session event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 100;

/// Events broadcast to session subscribers.
///
/// Serializable, so subscribers can forward them as JSON. Match with a
/// wildcard arm: the set of events grows with the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum SessionEvent {
    /// A scan result was received; `new` is false on rediscovery.
    Discovered {
        uuid: String,
        name: String,
        rssi: f32,
        new: bool,
    },
    /// A device changed connectivity state.
    ConnectivityChanged {
        uuid: String,
        from: Connectivity,
        to: Connectivity,
    },
    /// Pending commands were cancelled because the device disconnected.
    CommandsCancelled { uuid: String, count: usize },
    /// An inbound event could not be routed and was dropped.
    DispatchAnomaly { uuid: String, message: String },
}

impl SessionEvent {
    /// Build an anomaly event from a dispatch error.
    pub fn anomaly(error: &DispatchError) -> Self {
        let uuid = match error {
            DispatchError::UnknownDevice { uuid, .. } => uuid.clone(),
        };
        SessionEvent::DispatchAnomaly {
            uuid,
            message: error.to_string(),
        }
    }

    /// Device the event refers to.
    pub fn uuid(&self) -> &str {
        match self {
            SessionEvent::Discovered { uuid, .. }
            | SessionEvent::ConnectivityChanged { uuid, .. }
            | SessionEvent::CommandsCancelled { uuid, .. }
            | SessionEvent::DispatchAnomaly { uuid, .. } => uuid,
        }
    }
}

/// Sender for session events.
pub type EventSender = broadcast::Sender<SessionEvent>;

/// Receiver for session events.
pub type EventReceiver = broadcast::Receiver<SessionEvent>;

/// Broadcast bus for [`SessionEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: EventSender,
}

impl EventBus {
    /// Create a bus with the given capacity (at least 1).
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to events sent from now on.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Broadcast an event to current subscribers.
    pub fn send(&self, event: SessionEvent) {
        // Nobody subscribed yet; the event is simply not observed.
        let _ = self.sender.send(event);
    }

    /// Subscribers still holding a receiver.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
