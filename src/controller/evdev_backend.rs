//! # Linux evdev Input Backend
//!
//! Finds gamepads and joysticks under `/dev/input/event*` and reads their
//! current state on demand.
//!
//! ## Device Detection
//!
//! Every call to [`InputBackend::enumerate`] re-scans `/dev/input`. A device
//! is kept if:
//! - it reports `BTN_SOUTH` (gamepad), or
//! - it reports `BTN_TRIGGER` (joystick), or
//! - its name contains one of the configured vendor keywords
//!
//! ## Axis Mapping
//!
//! | evdev axis | Lexicon name | Range |
//! |------------|--------------|-------|
//! | `ABS_X`, `ABS_Y` | `x`, `y` | -1.0 to 1.0 |
//! | `ABS_RX`, `ABS_RY` | `rx`, `ry` | -1.0 to 1.0 |
//! | `ABS_Z`, `ABS_RZ` | `z`, `rz` | 0.0 to 1.0 |
//! | `ABS_HAT0X` + `ABS_HAT0Y` | `pov` | discrete d-pad value |
//!
//! Button identifiers are the evdev key names (`BTN_SOUTH`, `BTN_TL`, ...).

use evdev::{AbsoluteAxisType, Device, Key};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::backend::{controller_id, is_candidate, DeviceClass, DeviceInfo, InputBackend};
use super::input::{dpad_from_hat, RawSample};
use crate::error::{BridgeError, Result};

const STICK_AXES: [(AbsoluteAxisType, &str); 4] = [
    (AbsoluteAxisType::ABS_X, "x"),
    (AbsoluteAxisType::ABS_Y, "y"),
    (AbsoluteAxisType::ABS_RX, "rx"),
    (AbsoluteAxisType::ABS_RY, "ry"),
];

const TRIGGER_AXES: [(AbsoluteAxisType, &str); 2] = [
    (AbsoluteAxisType::ABS_Z, "z"),
    (AbsoluteAxisType::ABS_RZ, "rz"),
];

struct OpenDevice {
    device: Device,
    path: String,
}

/// evdev-backed [`InputBackend`].
///
/// Opened devices are cached by controller id between `enumerate` and `poll`.
/// A device whose state can no longer be read is closed and forgotten.
pub struct EvdevBackend {
    vendor_keywords: Vec<String>,
    devices: Mutex<HashMap<String, OpenDevice>>,
}

impl EvdevBackend {
    /// Creates a backend that also accepts unclassified devices whose name
    /// contains one of `vendor_keywords`.
    pub fn new(vendor_keywords: Vec<String>) -> Self {
        Self {
            vendor_keywords,
            devices: Mutex::new(HashMap::new()),
        }
    }

    fn devices(&self) -> MutexGuard<'_, HashMap<String, OpenDevice>> {
        self.devices.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of devices currently held open.
    pub fn open_count(&self) -> usize {
        self.devices().len()
    }
}

impl InputBackend for EvdevBackend {
    fn enumerate(&self) -> Result<Vec<DeviceInfo>> {
        let mut found = Vec::new();
        let mut opened = HashMap::new();

        let mut candidates: Vec<_> = evdev::enumerate().collect();
        // Deterministic order when several controllers are attached
        candidates.sort_by(|a, b| a.0.cmp(&b.0));

        for (path, device) in candidates {
            let name = device.name().unwrap_or("Unknown device").to_string();
            let class = classify(&device);

            if !is_candidate(&name, class, &self.vendor_keywords) {
                continue;
            }

            if let Err(e) = device.get_abs_state() {
                debug!("Skipping unpollable device {}: {}", path.display(), e);
                continue;
            }

            let input_id = device.input_id();
            let identity = format!(
                "{}:{:04x}:{:04x}",
                path.display(),
                input_id.vendor(),
                input_id.product()
            );
            let id = controller_id(&name, &identity);

            debug!(
                "Found input device: {} ({}, vendor: 0x{:04x}, product: 0x{:04x})",
                path.display(),
                name,
                input_id.vendor(),
                input_id.product()
            );

            found.push(DeviceInfo {
                id: id.clone(),
                name,
                class,
            });
            opened.insert(
                id,
                OpenDevice {
                    device,
                    path: path.to_string_lossy().to_string(),
                },
            );
        }

        let mut devices = self.devices();
        for (id, open) in opened {
            if !devices.contains_key(&id) {
                info!("Opened input device {} at {}", id, open.path);
                devices.insert(id, open);
            }
        }

        Ok(found)
    }

    fn poll(&self, device_id: &str) -> Result<RawSample> {
        let mut devices = self.devices();
        let open = devices
            .get(device_id)
            .ok_or_else(|| BridgeError::DeviceNotFound(device_id.to_string()))?;

        match read_sample(&open.device) {
            Ok(sample) => Ok(sample),
            Err(e) => {
                warn!(
                    "Input device {} at {} stopped responding: {}",
                    device_id, open.path, e
                );
                devices.remove(device_id);
                Err(e)
            }
        }
    }
}

fn classify(device: &Device) -> DeviceClass {
    match device.supported_keys() {
        Some(keys) if keys.contains(Key::BTN_SOUTH) => DeviceClass::Gamepad,
        Some(keys) if keys.contains(Key::BTN_TRIGGER) => DeviceClass::Stick,
        _ => DeviceClass::Unknown,
    }
}

fn read_sample(device: &Device) -> Result<RawSample> {
    let abs = device
        .get_abs_state()
        .map_err(|e| BridgeError::Device(format!("Failed to read axes: {}", e)))?;
    let keys = device
        .get_key_state()
        .map_err(|e| BridgeError::Device(format!("Failed to read buttons: {}", e)))?;

    let mut sample = RawSample::new();

    if let Some(supported) = device.supported_absolute_axes() {
        let read = |axis: AbsoluteAxisType| abs.get(axis.0 as usize);

        for (axis, name) in STICK_AXES {
            if supported.contains(axis) {
                if let Some(info) = read(axis) {
                    sample = sample
                        .with_axis(name, scale_stick(info.value, info.minimum, info.maximum));
                }
            }
        }

        for (axis, name) in TRIGGER_AXES {
            if supported.contains(axis) {
                if let Some(info) = read(axis) {
                    sample = sample
                        .with_axis(name, scale_trigger(info.value, info.minimum, info.maximum));
                }
            }
        }

        if supported.contains(AbsoluteAxisType::ABS_HAT0X)
            || supported.contains(AbsoluteAxisType::ABS_HAT0Y)
        {
            let x = read(AbsoluteAxisType::ABS_HAT0X).map_or(0, |i| i.value);
            let y = read(AbsoluteAxisType::ABS_HAT0Y).map_or(0, |i| i.value);
            sample = sample.with_axis("pov", dpad_from_hat(x, y));
        }
    }

    if let Some(supported) = device.supported_keys() {
        for key in supported.iter() {
            sample = sample.with_button(&format!("{:?}", key), keys.contains(key));
        }
    }

    Ok(sample)
}

/// Position of `value` within `min..=max` as 0.0..=1.0, or `None` for an
/// empty range. Computed in `f64` so full-width `i32` ranges cannot overflow.
fn range_position(value: i32, min: i32, max: i32) -> Option<f64> {
    if max <= min {
        return None;
    }
    let span = f64::from(max) - f64::from(min);
    Some(((f64::from(value) - f64::from(min)) / span).clamp(0.0, 1.0))
}

/// Maps a raw reading onto -1.0..=1.0 using the device's reported range.
fn scale_stick(value: i32, min: i32, max: i32) -> f32 {
    range_position(value, min, max).map_or(0.0, |p| (p * 2.0 - 1.0) as f32)
}

/// Maps a raw reading onto 0.0..=1.0 using the device's reported range.
fn scale_trigger(value: i32, min: i32, max: i32) -> f32 {
    range_position(value, min, max).map_or(0.0, |p| p as f32)
}
