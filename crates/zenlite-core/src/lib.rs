//! Session and telemetry layer for ZenLite EEG/PPG headbands.
//!
//! This crate turns the callback-driven native ZenLite transport into a
//! coherent per-device session. The transport is abstracted behind the
//! synchronous [`Transport`] trait (commands) and a channel of
//! [`TransportEvent`]s (everything the device reports).
//!
//! # Features
//!
//! - **Connection state machine**: gated connect and disconnect, with the
//!   transport's connectivity events as the source of truth
//! - **Command correlation**: fire-and-forget commands whose continuations
//!   run exactly once with the response, a rejection, a cancellation or a
//!   timeout
//! - **Event routing**: per-device [`Listener`]s plus a session-wide
//!   broadcast of [`SessionEvent`]s
//! - **Sliding-window telemetry**: sixteen independently present channels
//!   (EEG, IMU, raw and algorithmic PPG, mental state, sleep) buffered over
//!   configurable time windows
//! - **Two-tier reads**: live values while connected, cached values otherwise
//! - **Mock transport**: drive a full session without hardware
//!
//! # Threading
//!
//! Commands may be issued from any thread. Inbound events are handled by a
//! single dispatcher task; listener methods and command continuations run
//! with no session lock held. Consumers sample telemetry with
//! [`Session::snapshot`], which copies a channel under a per-device lock.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use zenlite_core::{MockTransport, Session, SessionConfig, SessionEvent};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (transport, events) = MockTransport::new();
//!     transport.add_random_device();
//!
//!     let session = Arc::new(Session::new(transport, SessionConfig::default())?);
//!     let mut updates = session.subscribe();
//!     let cancel = CancellationToken::new();
//!     session.spawn_dispatcher(events, cancel.clone());
//!
//!     session.start_scan()?;
//!     if let Ok(SessionEvent::Discovered { uuid, .. }) = updates.recv().await {
//!         session.connect(&uuid)?;
//!     }
//!
//!     cancel.cancel();
//!     Ok(())
//! }
//! ```

pub mod buffer;
pub mod config;
pub mod correlator;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod listener;
pub mod metrics;
pub mod mock;
pub mod registry;
pub mod session;
pub mod state;
pub mod transport;

// Core exports
pub use buffer::{Channel, ChannelSnapshot, DeviceTelemetry, TelemetryStore, WindowBuffer};
pub use config::{SessionConfig, WindowConfig};
pub use correlator::{CommandCorrelator, CommandOutcome, CorrelationId, PendingSummary};
pub use dispatcher::Dispatcher;
pub use error::{DispatchError, Error, Result};
pub use events::{EventBus, EventReceiver, EventSender, SessionEvent};
pub use listener::{Listener, ListenerTable};
pub use metrics::{DispatchMetrics, DispatchMetricsSnapshot};
pub use mock::{MockCommand, MockTransport, MockTransportBuilder};
pub use registry::{Device, DeviceRegistry, ReadSource, Reading};
pub use session::{Session, outcome_channel};
pub use state::{ConnectionStateMachine, Transition};
pub use transport::{
    Handle, Transport, TransportEvent, TransportReceiver, TransportSender, transport_channel,
};

// Re-export from zenlite-types
pub use zenlite_types::{
    CommandKind, CommandResponse, Connectivity, ContactState, DeviceInfo, ErrorCode, ScanResult,
    SysInfo,
};
