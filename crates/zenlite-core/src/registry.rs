//! Device registry.
//!
//! One record per discovered uuid, alive until the registry is dropped. The
//! registry owns the native handle of each device and its connection state
//! machine, so every connectivity decision is made under a single lock.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use zenlite_types::{Connectivity, ScanResult};

use crate::error::{Error, Result};
use crate::state::{ConnectionStateMachine, Transition, TransitionRejected};
use crate::transport::Handle;

/// A known device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    /// Stable identifier assigned at discovery.
    pub uuid: String,
    /// Advertised name.
    pub name: String,
    /// Hardware address.
    pub address: u64,
    /// Last-known signal strength in dBm.
    pub rssi: f32,
    /// Last battery level seen in an advertisement.
    pub broadcast_battery_level: u8,
    /// Whether the last advertisement reported pairing mode.
    pub in_pairing_mode: bool,
    /// Native handle, present while connected.
    pub handle: Option<Handle>,
    #[serde(rename = "connectivity")]
    machine: ConnectionStateMachine,
}

impl Device {
    fn from_scan(result: &ScanResult) -> Self {
        Self {
            uuid: result.uuid.clone(),
            name: result.name.clone(),
            address: result.address,
            rssi: result.rssi,
            broadcast_battery_level: result.battery_level.min(100),
            in_pairing_mode: result.in_pairing_mode,
            handle: None,
            machine: ConnectionStateMachine::new(),
        }
    }

    fn update_from_scan(&mut self, result: &ScanResult) {
        self.name = result.name.clone();
        self.address = result.address;
        self.rssi = result.rssi;
        self.broadcast_battery_level = result.battery_level.min(100);
        self.in_pairing_mode = result.in_pairing_mode;
    }

    /// Last-known connectivity.
    pub fn connectivity(&self) -> Connectivity {
        self.machine.state()
    }

    /// Rebuild the advertisement the transport needs to connect.
    pub fn scan_result(&self) -> ScanResult {
        ScanResult::new(&self.uuid, &self.name)
            .with_rssi(self.rssi)
            .with_address(self.address)
            .with_pairing_mode(self.in_pairing_mode)
            .with_battery_level(self.broadcast_battery_level)
    }
}

/// Which tier produced a two-tier read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadSource {
    /// Queried from the transport through the bound handle.
    Live,
    /// Last-known value held by the registry.
    Cached,
}

/// A value together with the tier it was read from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading<T> {
    pub value: T,
    pub source: ReadSource,
}

impl<T> Reading<T> {
    pub fn live(value: T) -> Self {
        Self {
            value,
            source: ReadSource::Live,
        }
    }

    pub fn cached(value: T) -> Self {
        Self {
            value,
            source: ReadSource::Cached,
        }
    }

    /// Whether the value came from the transport.
    pub fn is_live(&self) -> bool {
        self.source == ReadSource::Live
    }
}

/// Outcome of applying a transport connectivity event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectivityUpdate {
    pub transition: Transition,
    /// Handle released because the device entered `Disconnected`.
    pub released: Option<Handle>,
}

/// Registry of discovered devices keyed by uuid.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: RwLock<HashMap<String, Device>>,
}

impl DeviceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a newly discovered device or refresh an existing one in place.
    ///
    /// Returns a copy of the record after the update.
    pub fn upsert(&self, result: &ScanResult) -> Device {
        let mut devices = self.write();
        match devices.get_mut(&result.uuid) {
            Some(device) => {
                device.update_from_scan(result);
                debug!("Refreshed device {} ({})", result.uuid, result.name);
                device.clone()
            }
            None => {
                info!("Discovered device {} ({})", result.uuid, result.name);
                let device = Device::from_scan(result);
                devices.insert(result.uuid.clone(), device.clone());
                device
            }
        }
    }

    /// Get a copy of a device record.
    pub fn get(&self, uuid: &str) -> Option<Device> {
        self.read().get(uuid).cloned()
    }

    pub fn contains(&self, uuid: &str) -> bool {
        self.read().contains_key(uuid)
    }

    /// All known uuids, sorted.
    pub fn device_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Bind a native handle. Never overwrites an existing one.
    pub fn bind_handle(&self, uuid: &str, handle: Handle) -> Result<()> {
        let mut devices = self.write();
        let device = devices
            .get_mut(uuid)
            .ok_or_else(|| Error::device_not_found(uuid))?;
        if device.handle.is_some() {
            return Err(Error::HandleAlreadyBound(uuid.to_string()));
        }
        device.handle = Some(handle);
        debug!("Bound {} to device {}", handle, uuid);
        Ok(())
    }

    /// Bind the handle returned by a connect started with
    /// [`begin_connect`](Self::begin_connect).
    ///
    /// The device must still be `Connecting` (or already `Connected`): a
    /// disconnect applied while the transport call was running wins, and the
    /// handle is refused with [`Error::ConnectionFailed`].
    pub fn complete_connect(&self, uuid: &str, handle: Handle) -> Result<()> {
        let mut devices = self.write();
        let device = devices
            .get_mut(uuid)
            .ok_or_else(|| Error::device_not_found(uuid))?;
        match device.machine.state() {
            Connectivity::Connecting | Connectivity::Connected => {}
            state => {
                debug!("Refusing {} for {}: device is {}", handle, uuid, state);
                return Err(Error::ConnectionFailed(uuid.to_string()));
            }
        }
        if device.handle.is_some() {
            return Err(Error::HandleAlreadyBound(uuid.to_string()));
        }
        device.handle = Some(handle);
        debug!("Bound {} to device {}", handle, uuid);
        Ok(())
    }

    /// Release and return the bound handle, if any.
    pub fn unbind_handle(&self, uuid: &str) -> Option<Handle> {
        self.write().get_mut(uuid).and_then(|d| d.handle.take())
    }

    pub fn handle_for(&self, uuid: &str) -> Option<Handle> {
        self.read().get(uuid).and_then(|d| d.handle)
    }

    /// Last-known connectivity, `None` for unknown devices.
    pub fn connectivity(&self, uuid: &str) -> Option<Connectivity> {
        self.read().get(uuid).map(Device::connectivity)
    }

    /// Move a device to `Connecting` and return the advertisement to connect with.
    pub fn begin_connect(&self, uuid: &str) -> Result<ScanResult> {
        let mut devices = self.write();
        let device = devices
            .get_mut(uuid)
            .ok_or_else(|| Error::device_not_found(uuid))?;
        device
            .machine
            .begin_connect()
            .map_err(|rejected| invalid_transition(uuid, rejected))?;
        Ok(device.scan_result())
    }

    /// Roll a failed connect back to `Disconnected`.
    pub fn abort_connect(&self, uuid: &str) {
        if let Some(device) = self.write().get_mut(uuid) {
            device.machine.abort_connect();
        }
    }

    /// Move a device to `Disconnecting` and return its handle.
    pub fn begin_disconnect(&self, uuid: &str) -> Result<Option<Handle>> {
        let mut devices = self.write();
        let device = devices
            .get_mut(uuid)
            .ok_or_else(|| Error::device_not_found(uuid))?;
        device
            .machine
            .begin_disconnect()
            .map_err(|rejected| invalid_transition(uuid, rejected))?;
        Ok(device.handle)
    }

    /// Apply an authoritative connectivity event.
    ///
    /// Entering `Disconnected` releases the bound handle.
    pub fn apply_connectivity(&self, uuid: &str, state: Connectivity) -> Result<ConnectivityUpdate> {
        let mut devices = self.write();
        let device = devices
            .get_mut(uuid)
            .ok_or_else(|| Error::device_not_found(uuid))?;
        let transition = device.machine.apply(state);
        let released = if state == Connectivity::Disconnected {
            device.handle.take()
        } else {
            None
        };
        Ok(ConnectivityUpdate {
            transition,
            released,
        })
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Device>> {
        self.devices.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Device>> {
        self.devices.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn invalid_transition(uuid: &str, rejected: TransitionRejected) -> Error {
    Error::InvalidTransition {
        uuid: uuid.to_string(),
        from: rejected.from,
        action: rejected.action,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(uuid: &str, name: &str, battery: u8) -> ScanResult {
        ScanResult::new(uuid, name)
            .with_rssi(-60.0)
            .with_address(0x1122)
            .with_battery_level(battery)
    }

    #[test]
    fn test_upsert_keeps_one_record_with_latest_fields() {
        let registry = DeviceRegistry::new();
        registry.upsert(&scan("zl-1", "First", 40));
        registry.upsert(&scan("zl-1", "Second", 55).with_pairing_mode(true));
        let device = registry.upsert(&scan("zl-1", "Third", 70));

        assert_eq!(registry.len(), 1);
        assert_eq!(device.name, "Third");
        assert_eq!(device.broadcast_battery_level, 70);
        assert!(!device.in_pairing_mode);
        assert_eq!(registry.get("zl-1").unwrap().name, "Third");
    }

    #[test]
    fn test_rediscovery_preserves_handle_and_state() {
        let registry = DeviceRegistry::new();
        registry.upsert(&scan("zl-1", "ZenLite", 50));
        registry.begin_connect("zl-1").unwrap();
        registry.bind_handle("zl-1", Handle(9)).unwrap();

        registry.upsert(&scan("zl-1", "ZenLite", 45));
        assert_eq!(registry.handle_for("zl-1"), Some(Handle(9)));
        assert_eq!(registry.connectivity("zl-1"), Some(Connectivity::Connecting));
    }

    #[test]
    fn test_bind_never_overwrites() {
        let registry = DeviceRegistry::new();
        registry.upsert(&scan("zl-1", "ZenLite", 50));
        registry.bind_handle("zl-1", Handle(1)).unwrap();

        let err = registry.bind_handle("zl-1", Handle(2)).unwrap_err();
        assert!(matches!(err, Error::HandleAlreadyBound(ref id) if id == "zl-1"));
        assert_eq!(registry.handle_for("zl-1"), Some(Handle(1)));

        assert_eq!(registry.unbind_handle("zl-1"), Some(Handle(1)));
        registry.bind_handle("zl-1", Handle(2)).unwrap();
        assert_eq!(registry.handle_for("zl-1"), Some(Handle(2)));
    }

    #[test]
    fn test_bind_unknown_device() {
        let registry = DeviceRegistry::new();
        let err = registry.bind_handle("ghost", Handle(1)).unwrap_err();
        assert!(matches!(err, Error::DeviceNotFound(_)));
    }

    #[test]
    fn test_begin_connect_rejected_while_connecting() {
        let registry = DeviceRegistry::new();
        registry.upsert(&scan("zl-1", "ZenLite", 50));
        let advert = registry.begin_connect("zl-1").unwrap();
        assert_eq!(advert.uuid, "zl-1");
        assert_eq!(advert.battery_level, 50);

        let err = registry.begin_connect("zl-1").unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidTransition {
                from: Connectivity::Connecting,
                action: "connect",
                ..
            }
        ));

        registry.abort_connect("zl-1");
        assert!(registry.begin_connect("zl-1").is_ok());
    }

    #[test]
    fn test_disconnected_event_releases_handle() {
        let registry = DeviceRegistry::new();
        registry.upsert(&scan("zl-1", "ZenLite", 50));
        registry.begin_connect("zl-1").unwrap();
        registry.bind_handle("zl-1", Handle(3)).unwrap();
        registry
            .apply_connectivity("zl-1", Connectivity::Connected)
            .unwrap();

        assert_eq!(registry.begin_disconnect("zl-1").unwrap(), Some(Handle(3)));
        let update = registry
            .apply_connectivity("zl-1", Connectivity::Disconnected)
            .unwrap();
        assert!(update.transition.entered(Connectivity::Disconnected));
        assert_eq!(update.released, Some(Handle(3)));
        assert_eq!(registry.handle_for("zl-1"), None);
        // The device itself survives the disconnect.
        assert!(registry.contains("zl-1"));
    }

    #[test]
    fn test_complete_connect_binds_while_connecting() {
        let registry = DeviceRegistry::new();
        registry.upsert(&scan("zl-1", "ZenLite", 50));
        registry.begin_connect("zl-1").unwrap();
        registry.complete_connect("zl-1", Handle(4)).unwrap();
        assert_eq!(registry.handle_for("zl-1"), Some(Handle(4)));
    }

    #[test]
    fn test_complete_connect_accepts_early_connected_event() {
        let registry = DeviceRegistry::new();
        registry.upsert(&scan("zl-1", "ZenLite", 50));
        registry.begin_connect("zl-1").unwrap();
        registry
            .apply_connectivity("zl-1", Connectivity::Connected)
            .unwrap();
        registry.complete_connect("zl-1", Handle(4)).unwrap();
        assert_eq!(registry.handle_for("zl-1"), Some(Handle(4)));
    }

    #[test]
    fn test_complete_connect_refused_after_disconnect_event() {
        let registry = DeviceRegistry::new();
        registry.upsert(&scan("zl-1", "ZenLite", 50));
        registry.begin_connect("zl-1").unwrap();
        // The connect attempt fails while the transport call is running.
        registry
            .apply_connectivity("zl-1", Connectivity::Disconnected)
            .unwrap();

        let err = registry.complete_connect("zl-1", Handle(4)).unwrap_err();
        assert!(matches!(err, Error::ConnectionFailed(_)));
        assert_eq!(registry.handle_for("zl-1"), None);
        assert_eq!(
            registry.connectivity("zl-1"),
            Some(Connectivity::Disconnected)
        );
        // Nothing is left behind to block the next attempt.
        registry.begin_connect("zl-1").unwrap();
        registry.complete_connect("zl-1", Handle(5)).unwrap();
    }

    #[test]
    fn test_apply_connectivity_unknown_device() {
        let registry = DeviceRegistry::new();
        assert!(
            registry
                .apply_connectivity("ghost", Connectivity::Connected)
                .is_err()
        );
    }

    #[test]
    fn test_device_ids_sorted() {
        let registry = DeviceRegistry::new();
        registry.upsert(&scan("b", "B", 1));
        registry.upsert(&scan("a", "A", 1));
        assert_eq!(registry.device_ids(), vec!["a".to_string(), "b".to_string()]);
        assert!(!registry.is_empty());
    }

    #[test]
    fn test_reading_tiers() {
        let live = Reading::live(80u8);
        let cached = Reading::cached(40u8);
        assert!(live.is_live());
        assert!(!cached.is_live());
        assert_eq!(cached.source, ReadSource::Cached);
    }
}
