//! # Controller Registry
//!
//! Concurrent map of attached input devices, refreshed by detection and
//! updated by every poll cycle.
//!
//! A device is *connected* only while its last successful poll is younger
//! than the connection timeout. Connectivity is derived on read, never
//! stored.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::backend::{DeviceClass, DeviceInfo, InputBackend};
use super::calibration::Calibration;
use super::input::{normalize, InputSnapshot, NormalizedInput};

/// One tracked input device.
#[derive(Debug, Clone)]
pub struct ControllerDevice {
    pub id: String,
    pub display_name: String,
    pub class: DeviceClass,
    pub enabled: bool,
    pub last_snapshot: NormalizedInput,
    pub last_update: Instant,
    last_update_wall: DateTime<Utc>,
}

impl ControllerDevice {
    pub fn new(info: &DeviceInfo, snapshot: NormalizedInput, now: Instant) -> Self {
        Self {
            id: info.id.clone(),
            display_name: info.name.clone(),
            class: info.class,
            enabled: true,
            last_snapshot: snapshot,
            last_update: now,
            last_update_wall: Utc::now(),
        }
    }

    /// True if the last successful poll is younger than `timeout`.
    #[must_use]
    pub fn is_connected_at(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_update) < timeout
    }

    #[must_use]
    pub fn view(&self, now: Instant, timeout: Duration) -> ControllerView {
        ControllerView {
            id: self.id.clone(),
            display_name: self.display_name.clone(),
            class: self.class,
            enabled: self.enabled,
            connected: self.is_connected_at(now, timeout),
            last_update: self.last_update_wall,
            input: self.last_snapshot.snapshot(),
        }
    }
}

/// Serializable listing entry for a controller.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerView {
    pub id: String,
    pub display_name: String,
    pub class: DeviceClass,
    pub enabled: bool,
    pub connected: bool,
    pub last_update: DateTime<Utc>,
    pub input: InputSnapshot,
}

/// Outcome of one detection cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Detection {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

/// Thread-safe controller map.
#[derive(Debug, Default)]
pub struct ControllerRegistry {
    devices: RwLock<HashMap<String, ControllerDevice>>,
}

impl ControllerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, ControllerDevice>> {
        self.devices.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, ControllerDevice>> {
        self.devices.write().unwrap_or_else(|e| e.into_inner())
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.read().contains_key(id)
    }

    /// Inserts `device` unless its id is already tracked. Returns true if inserted.
    pub fn insert_if_absent(&self, device: ControllerDevice) -> bool {
        let mut devices = self.write();
        if devices.contains_key(&device.id) {
            return false;
        }
        devices.insert(device.id.clone(), device);
        true
    }

    pub fn remove(&self, id: &str) -> Option<ControllerDevice> {
        self.write().remove(id)
    }

    /// Returns false if `id` is not tracked.
    pub fn set_enabled(&self, id: &str, enabled: bool) -> bool {
        match self.write().get_mut(id) {
            Some(device) => {
                device.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Stores a fresh snapshot. Ignored if the device was removed meanwhile.
    pub fn record_snapshot(&self, id: &str, snapshot: NormalizedInput, now: Instant) {
        if let Some(device) = self.write().get_mut(id) {
            device.last_snapshot = snapshot;
            device.last_update = now;
            device.last_update_wall = Utc::now();
        }
    }

    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<ControllerDevice> {
        self.read().get(id).cloned()
    }

    #[must_use]
    pub fn is_enabled(&self, id: &str) -> bool {
        self.read().get(id).map_or(false, |d| d.enabled)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    #[must_use]
    pub fn is_connected_at(&self, id: &str, now: Instant, timeout: Duration) -> bool {
        self.read()
            .get(id)
            .map_or(false, |d| d.is_connected_at(now, timeout))
    }

    /// Listing sorted by id.
    #[must_use]
    pub fn list(&self, now: Instant, timeout: Duration) -> Vec<ControllerView> {
        let mut views: Vec<ControllerView> =
            self.read().values().map(|d| d.view(now, timeout)).collect();
        views.sort_by(|a, b| a.id.cmp(&b.id));
        views
    }

    /// Runs one detection cycle against `backend`.
    ///
    /// Tracked devices whose poll now fails are removed. New candidates are
    /// inserted (enabled) only if a verification poll succeeds. Enumeration
    /// errors are logged and treated as "no devices found".
    pub fn detect(
        &self,
        backend: &dyn InputBackend,
        calibration: Calibration,
        now: Instant,
    ) -> Detection {
        let mut detection = Detection::default();

        for id in self.ids() {
            if let Err(e) = backend.poll(&id) {
                if self.remove(&id).is_some() {
                    info!(controller = %id, "Controller removed: {}", e);
                    detection.removed.push(id);
                }
            }
        }

        let candidates = match backend.enumerate() {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!("Input device enumeration failed: {}", e);
                return detection;
            }
        };

        for info in candidates {
            if self.contains(&info.id) {
                continue;
            }
            match backend.poll(&info.id) {
                Ok(sample) => {
                    let device = ControllerDevice::new(&info, normalize(&sample, calibration), now);
                    if self.insert_if_absent(device) {
                        info!(controller = %info.id, "Controller attached: {}", info.name);
                        detection.added.push(info.id);
                    }
                }
                Err(e) => debug!(controller = %info.id, "Candidate not pollable: {}", e),
            }
        }

        detection
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::backend::fakes::FakeBackend;
    use crate::controller::backend::MockInputBackend;
    use crate::controller::input::RawSample;
    use crate::error::BridgeError;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn info(id: &str) -> DeviceInfo {
        DeviceInfo {
            id: id.to_string(),
            name: format!("{} pad", id),
            class: DeviceClass::Gamepad,
        }
    }

    #[test]
    fn test_insert_if_absent() {
        let registry = ControllerRegistry::new();
        let now = Instant::now();
        assert!(registry.insert_if_absent(ControllerDevice::new(&info("a"), NormalizedInput::default(), now)));
        assert!(!registry.insert_if_absent(ControllerDevice::new(&info("a"), NormalizedInput::default(), now)));
        assert_eq!(registry.len(), 1);
        assert!(registry.is_enabled("a"));
    }

    #[test]
    fn test_set_enabled_unknown() {
        let registry = ControllerRegistry::new();
        assert!(!registry.set_enabled("ghost", false));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_connectivity_is_derived() {
        let registry = ControllerRegistry::new();
        let start = Instant::now();
        registry.insert_if_absent(ControllerDevice::new(&info("a"), NormalizedInput::default(), start));

        assert!(registry.is_connected_at("a", start + Duration::from_secs(4), TIMEOUT));
        assert!(!registry.is_connected_at("a", start + Duration::from_secs(6), TIMEOUT));

        registry.record_snapshot("a", NormalizedInput::default(), start + Duration::from_secs(6));
        assert!(registry.is_connected_at("a", start + Duration::from_secs(7), TIMEOUT));
        assert!(!registry.is_connected_at("missing", start, TIMEOUT));
    }

    #[test]
    fn test_record_snapshot_after_removal_is_ignored() {
        let registry = ControllerRegistry::new();
        registry.record_snapshot("a", NormalizedInput::default(), Instant::now());
        assert!(!registry.contains("a"));
    }

    #[test]
    fn test_detect_adds_pollable_devices() {
        let backend = FakeBackend::new();
        backend.plug("pad_1", "Pad One");
        backend.plug("pad_2", "Pad Two");
        backend.set_failing("pad_2", true);

        let registry = ControllerRegistry::new();
        let detection = registry.detect(&backend, Calibration::default(), Instant::now());

        assert_eq!(detection.added, vec!["pad_1".to_string()]);
        assert!(detection.removed.is_empty());
        assert!(registry.contains("pad_1"));
        assert!(!registry.contains("pad_2"));
    }

    #[test]
    fn test_detect_keeps_enabled_flag_of_known_device() {
        let backend = FakeBackend::new();
        backend.plug("pad_1", "Pad One");
        let registry = ControllerRegistry::new();
        registry.detect(&backend, Calibration::default(), Instant::now());
        registry.set_enabled("pad_1", false);

        let detection = registry.detect(&backend, Calibration::default(), Instant::now());
        assert_eq!(detection, Detection::default());
        assert!(!registry.is_enabled("pad_1"));
    }

    #[test]
    fn test_detect_removes_unresponsive_device() {
        let backend = FakeBackend::new();
        backend.plug("pad_1", "Pad One");
        let registry = ControllerRegistry::new();
        let start = Instant::now();
        registry.detect(&backend, Calibration::default(), start);

        backend.set_failing("pad_1", true);
        let later = start + Duration::from_secs(6);
        assert!(!registry.is_connected_at("pad_1", later, TIMEOUT));

        let detection = registry.detect(&backend, Calibration::default(), later);
        assert_eq!(detection.removed, vec!["pad_1".to_string()]);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_detect_removes_unplugged_device() {
        let backend = FakeBackend::new();
        backend.plug("pad_1", "Pad One");
        backend.plug("pad_2", "Pad Two");
        let registry = ControllerRegistry::new();
        let now = Instant::now();
        registry.detect(&backend, Calibration::default(), now);

        backend.unplug("pad_1");
        let detection = registry.detect(&backend, Calibration::default(), now);
        assert_eq!(detection.removed, vec!["pad_1".to_string()]);
        assert!(detection.added.is_empty());
        assert_eq!(registry.ids(), vec!["pad_2".to_string()]);
    }

    #[test]
    fn test_detect_stores_initial_snapshot() {
        let backend = FakeBackend::new();
        backend.plug("pad_1", "Pad One");
        backend.set_sample("pad_1", RawSample::new().with_axis("x", 0.5));
        let registry = ControllerRegistry::new();
        registry.detect(&backend, Calibration::default(), Instant::now());

        let device = registry.get("pad_1").unwrap();
        assert_eq!(device.last_snapshot.left_x(), 0.5);
        assert_eq!(device.display_name, "Pad One");
    }

    #[test]
    fn test_detect_survives_enumeration_error() {
        let mut backend = MockInputBackend::new();
        backend
            .expect_enumerate()
            .returning(|| Err(BridgeError::Device("permission denied".to_string())));
        backend.expect_poll().returning(|_| Ok(RawSample::new()));

        let registry = ControllerRegistry::new();
        registry.insert_if_absent(ControllerDevice::new(&info("a"), NormalizedInput::default(), Instant::now()));

        let detection = registry.detect(&backend, Calibration::default(), Instant::now());
        assert_eq!(detection, Detection::default());
        assert!(registry.contains("a"));
    }

    #[test]
    fn test_list_is_sorted_and_serializable() {
        let registry = ControllerRegistry::new();
        let now = Instant::now();
        registry.insert_if_absent(ControllerDevice::new(&info("b"), NormalizedInput::default(), now));
        registry.insert_if_absent(ControllerDevice::new(&info("a"), NormalizedInput::default(), now));

        let list = registry.list(now, TIMEOUT);
        assert_eq!(list[0].id, "a");
        assert!(list[0].connected);

        let json = serde_json::to_value(&list[1]).unwrap();
        assert_eq!(json["displayName"], "b pad");
        assert_eq!(json["class"], "gamepad");
        assert_eq!(json["enabled"], true);
    }
}
