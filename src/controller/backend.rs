//! Trait abstraction over the OS input-device environment to enable testing

use serde::Serialize;

use super::input::RawSample;
use crate::error::Result;

/// Coarse classification of an input device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Gamepad,
    Stick,
    Unknown,
}

/// A device seen during enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Stable identity, used as the controller id.
    pub id: String,
    pub name: String,
    pub class: DeviceClass,
}

/// Enumeration and polling of input devices.
///
/// `enumerate` re-scans the environment on every call and returns only
/// devices worth tracking. `poll` reads the current state of one device;
/// an error means the device is gone or unusable.
#[cfg_attr(test, mockall::automock)]
pub trait InputBackend: Send + Sync {
    fn enumerate(&self) -> Result<Vec<DeviceInfo>>;

    fn poll(&self, device_id: &str) -> Result<RawSample>;
}

/// Stable controller id: sanitized name, then `_` and a hash of the identity.
pub fn controller_id(name: &str, identity: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let hash = identity
        .bytes()
        .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(u32::from(b)));
    format!("{}_{:08x}", sanitized, hash)
}

/// Keeps a device if it is a gamepad or stick, or its name contains one of
/// `vendor_keywords` (case-insensitive).
pub fn is_candidate(name: &str, class: DeviceClass, vendor_keywords: &[String]) -> bool {
    if class != DeviceClass::Unknown {
        return true;
    }
    let lower = name.to_lowercase();
    vendor_keywords
        .iter()
        .any(|keyword| !keyword.is_empty() && lower.contains(&keyword.to_lowercase()))
}

#[cfg(test)]
pub mod fakes {
    use super::*;
    use crate::error::BridgeError;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// Scriptable backend: devices can be plugged, unplugged and fed samples
    /// while the code under test holds a clone.
    #[derive(Clone, Default)]
    pub struct FakeBackend {
        devices: Arc<Mutex<Vec<DeviceInfo>>>,
        samples: Arc<Mutex<HashMap<String, RawSample>>>,
        failing: Arc<Mutex<Vec<String>>>,
    }

    impl FakeBackend {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn plug(&self, id: &str, name: &str) {
            self.devices.lock().unwrap().push(DeviceInfo {
                id: id.to_string(),
                name: name.to_string(),
                class: DeviceClass::Gamepad,
            });
            self.samples
                .lock()
                .unwrap()
                .insert(id.to_string(), RawSample::new());
        }

        pub fn unplug(&self, id: &str) {
            self.devices.lock().unwrap().retain(|d| d.id != id);
            self.samples.lock().unwrap().remove(id);
        }

        pub fn set_sample(&self, id: &str, sample: RawSample) {
            self.samples.lock().unwrap().insert(id.to_string(), sample);
        }

        /// Polls of `id` fail until `set_failing(id, false)`.
        pub fn set_failing(&self, id: &str, failing: bool) {
            let mut list = self.failing.lock().unwrap();
            list.retain(|d| d != id);
            if failing {
                list.push(id.to_string());
            }
        }
    }

    impl InputBackend for FakeBackend {
        fn enumerate(&self) -> Result<Vec<DeviceInfo>> {
            Ok(self.devices.lock().unwrap().clone())
        }

        fn poll(&self, device_id: &str) -> Result<RawSample> {
            if self.failing.lock().unwrap().iter().any(|d| d == device_id) {
                return Err(BridgeError::Device(format!("{} stopped responding", device_id)));
            }
            self.samples
                .lock()
                .unwrap()
                .get(device_id)
                .cloned()
                .ok_or_else(|| BridgeError::DeviceNotFound(device_id.to_string()))
        }
    }
}
