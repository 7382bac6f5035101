//! # Controller Module
//!
//! Input device handling.
//!
//! This module handles:
//! - Gamepad and joystick detection via evdev
//! - Normalizing raw axis and button readings
//! - Applying the stick deadzone and movement threshold
//! - Tracking attached devices and their connectivity

pub mod backend;
pub mod calibration;
pub mod evdev_backend;
pub mod input;
pub mod registry;

pub use backend::{DeviceClass, DeviceInfo, InputBackend};
pub use calibration::Calibration;
pub use evdev_backend::EvdevBackend;
pub use input::{normalize, NormalizedInput, RawSample};
pub use registry::{ControllerRegistry, ControllerView, Detection};
