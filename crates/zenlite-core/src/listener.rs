//! Per-device event listeners.
//!
//! Applications implement [`Listener`] for the events they care about; every
//! method defaults to a no-op. Listener methods are called from the
//! dispatcher task with no session lock held, so they may call back into the
//! session freely. They should return quickly: a slow listener delays every
//! later event on the transport channel.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use zenlite_types::{
    BrainWave, Connectivity, ContactState, DeviceEvent, DeviceInfo, EegData, HardwareError,
    ImuData, Orientation, PpgData, SleepReport, SleepStage,
};

/// Receiver of routed device events.
#[allow(unused_variables)]
pub trait Listener: Send + Sync {
    fn on_device_info_ready(&self, uuid: &str, info: &DeviceInfo) {}

    fn on_eeg_data(&self, uuid: &str, data: &EegData) {}

    fn on_imu_data(&self, uuid: &str, data: &ImuData) {}

    fn on_ppg_data(&self, uuid: &str, data: &PpgData) {}

    fn on_brain_wave(&self, uuid: &str, wave: &BrainWave) {}

    /// A transport error code with its human-readable message.
    fn on_error(&self, uuid: &str, code: i32, message: &str) {}

    fn on_hardware_error(&self, uuid: &str, error: HardwareError) {}

    /// EEG signal quality dropped below the device threshold.
    fn on_signal_quality_warning(&self, uuid: &str, quality: i32) {}

    fn on_connectivity_change(&self, uuid: &str, state: Connectivity) {}

    fn on_contact_state_change(&self, uuid: &str, state: ContactState) {}

    fn on_orientation_change(&self, uuid: &str, orientation: Orientation) {}

    fn on_event(&self, uuid: &str, event: DeviceEvent) {}

    fn on_stress(&self, uuid: &str, value: f32) {}

    fn on_meditation(&self, uuid: &str, value: f32) {}

    fn on_sleep_stage(&self, uuid: &str, stage: SleepStage, confidence: f32, drowsiness: f32) {}

    fn on_blink(&self, uuid: &str) {}

    fn on_sleep_report(&self, uuid: &str, report: &SleepReport) {}
}

/// Listeners keyed by device uuid.
#[derive(Default)]
pub struct ListenerTable {
    listeners: RwLock<HashMap<String, Arc<dyn Listener>>>,
}

impl std::fmt::Debug for ListenerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let listeners = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<&String> = listeners.keys().collect();
        ids.sort();
        f.debug_struct("ListenerTable").field("devices", &ids).finish()
    }
}

impl ListenerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a listener, returning the one it replaces.
    pub fn set(&self, uuid: &str, listener: Arc<dyn Listener>) -> Option<Arc<dyn Listener>> {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(uuid.to_string(), listener)
    }

    /// Remove a device's listener.
    pub fn clear(&self, uuid: &str) -> Option<Arc<dyn Listener>> {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(uuid)
    }

    /// The listener for a device, cloned out so it can be called unlocked.
    pub fn get(&self, uuid: &str) -> Option<Arc<dyn Listener>> {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(uuid)
            .cloned()
    }

    /// Run `f` with the device's listener, if one is set.
    pub fn notify(&self, uuid: &str, f: impl FnOnce(&dyn Listener)) {
        if let Some(listener) = self.get(uuid) {
            f(listener.as_ref());
        }
    }
}
