//! Per-device connection state machine.
//!
//! ```text
//!              begin_connect                 event: Connected
//! Disconnected ─────────────▶ Connecting ─────────────────────▶ Connected
//!      ▲                           │                                │
//!      │     event: Disconnected   │            begin_disconnect    │
//!      └───────────────────────────┴──── Disconnecting ◀────────────┘
//! ```
//!
//! Caller-initiated moves (`begin_connect`, `begin_disconnect`) are gated;
//! transport events are authoritative and always applied.

use serde::{Deserialize, Serialize};

use zenlite_types::Connectivity;

/// A state change, reported so callers can react to entering a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: Connectivity,
    pub to: Connectivity,
}

impl Transition {
    /// Whether this transition moved into `state` from a different one.
    pub fn entered(&self, state: Connectivity) -> bool {
        self.from != state && self.to == state
    }

    /// Whether the state actually changed.
    pub fn is_change(&self) -> bool {
        self.from != self.to
    }
}

/// A caller-initiated move that the current state does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionRejected {
    pub from: Connectivity,
    pub action: &'static str,
}

/// Connectivity of one device plus the rules for moving between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionStateMachine {
    state: Connectivity,
}

impl ConnectionStateMachine {
    /// A machine in the `Disconnected` state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    pub fn state(&self) -> Connectivity {
        self.state
    }

    /// Start connecting. Only allowed from `Disconnected`.
    pub fn begin_connect(&mut self) -> Result<Transition, TransitionRejected> {
        if self.state != Connectivity::Disconnected {
            return Err(TransitionRejected {
                from: self.state,
                action: "connect",
            });
        }
        Ok(self.set(Connectivity::Connecting))
    }

    /// Start disconnecting. Rejected when already disconnected or disconnecting.
    pub fn begin_disconnect(&mut self) -> Result<Transition, TransitionRejected> {
        match self.state {
            Connectivity::Disconnected | Connectivity::Disconnecting => Err(TransitionRejected {
                from: self.state,
                action: "disconnect",
            }),
            Connectivity::Connecting | Connectivity::Connected => {
                Ok(self.set(Connectivity::Disconnecting))
            }
        }
    }

    /// Roll back a connect attempt that produced no handle.
    pub fn abort_connect(&mut self) -> Transition {
        self.set(Connectivity::Disconnected)
    }

    /// Apply a transport connectivity event.
    pub fn apply(&mut self, event: Connectivity) -> Transition {
        self.set(event)
    }

    fn set(&mut self, to: Connectivity) -> Transition {
        let from = std::mem::replace(&mut self.state, to);
        Transition { from, to }
    }
}
