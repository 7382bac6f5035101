//! # Input Normalizer Module
//!
//! Converts one poll's raw axis/button readings into a bounded
//! [`NormalizedInput`] snapshot.
//!
//! ## Axis Lexicon
//!
//! Axis names are matched case-insensitively. Unknown axes are ignored.
//!
//! | Axis name | Field | Notes |
//! |-----------|-------|-------|
//! | `x`, `x axis` | left X | |
//! | `y`, `y axis` | left Y | inverted |
//! | `rx`, `z rotation` | right X | |
//! | `ry`, `z axis` | right Y | inverted |
//! | `z`, `left trigger` | left trigger | 0.0-1.0 |
//! | `rz`, `right trigger` | right trigger | 0.0-1.0 |
//! | `pov`, `hat switch` | d-pad | discrete, see [`dpad_from_hat`] |
//!
//! ## Buttons
//!
//! Every button lands in one of 16 slots chosen by `hash(identifier) mod 16`.
//! Collisions are possible; the last write in a poll wins. Identifiers that
//! name a face button (`BTN_SOUTH`, `a`, `cross`, ...) also set the matching
//! packet button.
//!
//! ## Usage
//!
//! ```
//! use teleop_bridge::controller::calibration::Calibration;
//! use teleop_bridge::controller::input::{normalize, RawSample};
//!
//! let sample = RawSample::new()
//!     .with_axis("Y", 0.5)
//!     .with_button("BTN_SOUTH", true);
//! let input = normalize(&sample, Calibration::default());
//!
//! assert_eq!(input.left_y(), -0.5);
//! assert!(input.face_buttons().cross);
//! ```

use serde::Serialize;

use super::calibration::Calibration;
use crate::protocol::FaceButtons;

/// Number of button slots in a snapshot.
pub const BUTTON_SLOTS: usize = 16;

/// D-pad released.
pub const DPAD_CENTER: f32 = 0.0;
pub const DPAD_UP_RIGHT: f32 = 0.125;
pub const DPAD_RIGHT: f32 = 0.25;
pub const DPAD_DOWN_RIGHT: f32 = 0.375;
pub const DPAD_DOWN: f32 = 0.5;
pub const DPAD_DOWN_LEFT: f32 = 0.625;
pub const DPAD_LEFT: f32 = 0.75;
pub const DPAD_UP_LEFT: f32 = 0.875;
pub const DPAD_UP: f32 = 1.0;

/// Raw readings from a single poll of one device.
///
/// Stick axes are expected in -1.0..=1.0 and triggers in 0.0..=1.0; anything
/// outside is clamped during normalization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawSample {
    pub axes: Vec<(String, f32)>,
    pub buttons: Vec<(String, bool)>,
}

impl RawSample {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_axis(mut self, name: &str, value: f32) -> Self {
        self.axes.push((name.to_string(), value));
        self
    }

    #[must_use]
    pub fn with_button(mut self, id: &str, pressed: bool) -> Self {
        self.buttons.push((id.to_string(), pressed));
        self
    }
}

/// Deadzone-aware snapshot of one controller.
///
/// Stick values are stored as read and the deadzone is applied by the
/// accessors, so the stored snapshot never loses information.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedInput {
    left_x: f32,
    left_y: f32,
    right_x: f32,
    right_y: f32,
    left_trigger: f32,
    right_trigger: f32,
    dpad: f32,
    buttons: [bool; BUTTON_SLOTS],
    face: FaceButtons,
    calibration: Calibration,
}

impl Default for NormalizedInput {
    fn default() -> Self {
        Self::new(Calibration::default())
    }
}

impl NormalizedInput {
    /// Centered sticks, released triggers and buttons.
    #[must_use]
    pub fn new(calibration: Calibration) -> Self {
        Self {
            left_x: 0.0,
            left_y: 0.0,
            right_x: 0.0,
            right_y: 0.0,
            left_trigger: 0.0,
            right_trigger: 0.0,
            dpad: DPAD_CENTER,
            buttons: [false; BUTTON_SLOTS],
            face: FaceButtons::default(),
            calibration,
        }
    }

    pub fn set_left_x(&mut self, value: f32) {
        self.left_x = clamp_stick(value);
    }

    pub fn set_left_y(&mut self, value: f32) {
        self.left_y = clamp_stick(value);
    }

    pub fn set_right_x(&mut self, value: f32) {
        self.right_x = clamp_stick(value);
    }

    pub fn set_right_y(&mut self, value: f32) {
        self.right_y = clamp_stick(value);
    }

    pub fn set_left_trigger(&mut self, value: f32) {
        self.left_trigger = clamp_trigger(value);
    }

    pub fn set_right_trigger(&mut self, value: f32) {
        self.right_trigger = clamp_trigger(value);
    }

    pub fn set_dpad(&mut self, value: f32) {
        self.dpad = clamp_trigger(value);
    }

    /// Out-of-range slots are ignored.
    pub fn set_button(&mut self, slot: usize, pressed: bool) {
        if let Some(button) = self.buttons.get_mut(slot) {
            *button = pressed;
        }
    }

    pub fn set_face_buttons(&mut self, face: FaceButtons) {
        self.face = face;
    }

    #[must_use]
    pub fn left_x(&self) -> f32 {
        self.calibration.apply(self.left_x)
    }

    #[must_use]
    pub fn left_y(&self) -> f32 {
        self.calibration.apply(self.left_y)
    }

    #[must_use]
    pub fn right_x(&self) -> f32 {
        self.calibration.apply(self.right_x)
    }

    #[must_use]
    pub fn right_y(&self) -> f32 {
        self.calibration.apply(self.right_y)
    }

    /// Triggers have no deadzone.
    #[must_use]
    pub fn left_trigger(&self) -> f32 {
        self.left_trigger
    }

    #[must_use]
    pub fn right_trigger(&self) -> f32 {
        self.right_trigger
    }

    #[must_use]
    pub fn dpad(&self) -> f32 {
        self.dpad
    }

    #[must_use]
    pub fn button(&self, slot: usize) -> bool {
        self.buttons.get(slot).copied().unwrap_or(false)
    }

    #[must_use]
    pub fn buttons(&self) -> &[bool; BUTTON_SLOTS] {
        &self.buttons
    }

    #[must_use]
    pub fn face_buttons(&self) -> FaceButtons {
        self.face
    }

    #[must_use]
    pub fn forward(&self) -> f32 {
        -self.left_y()
    }

    #[must_use]
    pub fn sideways(&self) -> f32 {
        self.left_x()
    }

    #[must_use]
    pub fn rotation(&self) -> f32 {
        self.right_x()
    }

    /// True if forward, sideways or rotation exceeds the movement threshold.
    #[must_use]
    pub fn has_movement(&self) -> bool {
        self.calibration.is_moving(self.forward())
            || self.calibration.is_moving(self.sideways())
            || self.calibration.is_moving(self.rotation())
    }

    #[must_use]
    pub fn is_stop_command(&self) -> bool {
        !self.has_movement()
    }

    /// Serializable view with the deadzone applied.
    #[must_use]
    pub fn snapshot(&self) -> InputSnapshot {
        InputSnapshot {
            left_x: self.left_x(),
            left_y: self.left_y(),
            right_x: self.right_x(),
            right_y: self.right_y(),
            left_trigger: self.left_trigger,
            right_trigger: self.right_trigger,
            dpad: self.dpad,
            buttons: self.buttons,
            forward: self.forward(),
            sideways: self.sideways(),
            rotation: self.rotation(),
            has_movement: self.has_movement(),
        }
    }
}

/// What callers see of a controller's last input.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InputSnapshot {
    pub left_x: f32,
    pub left_y: f32,
    pub right_x: f32,
    pub right_y: f32,
    pub left_trigger: f32,
    pub right_trigger: f32,
    pub dpad: f32,
    pub buttons: [bool; BUTTON_SLOTS],
    pub forward: f32,
    pub sideways: f32,
    pub rotation: f32,
    pub has_movement: bool,
}

/// Normalizes one poll's raw readings. Pure; no side effects.
#[must_use]
pub fn normalize(sample: &RawSample, calibration: Calibration) -> NormalizedInput {
    let mut input = NormalizedInput::new(calibration);

    for (name, value) in &sample.axes {
        match name.trim().to_ascii_lowercase().as_str() {
            "x" | "x axis" => input.set_left_x(*value),
            "y" | "y axis" => input.set_left_y(-*value),
            "rx" | "z rotation" => input.set_right_x(*value),
            "ry" | "z axis" => input.set_right_y(-*value),
            "z" | "left trigger" => input.set_left_trigger(*value),
            "rz" | "right trigger" => input.set_right_trigger(*value),
            "pov" | "hat switch" => input.set_dpad(*value),
            _ => {}
        }
    }

    let mut face = FaceButtons::default();
    for (id, pressed) in &sample.buttons {
        input.set_button(button_slot(id), *pressed);

        match id.trim().to_ascii_lowercase().as_str() {
            "btn_south" | "btn_a" | "a" | "cross" => face.cross = *pressed,
            "btn_east" | "btn_b" | "b" | "circle" => face.circle = *pressed,
            "btn_west" | "btn_x" | "x" | "square" => face.square = *pressed,
            "btn_north" | "btn_y" | "y" | "triangle" => face.triangle = *pressed,
            _ => {}
        }
    }
    input.set_face_buttons(face);

    input
}

/// Slot for a button identifier: 31-multiplier string hash, non-negative mod 16.
#[must_use]
pub fn button_slot(identifier: &str) -> usize {
    let hash = identifier
        .chars()
        .fold(0i32, |acc, c| acc.wrapping_mul(31).wrapping_add(c as i32));
    hash.rem_euclid(BUTTON_SLOTS as i32) as usize
}

/// Encodes a hat switch position (`x`: -1 left / 1 right, `y`: -1 up / 1 down)
/// as the discrete d-pad value.
///
/// # Examples
///
/// ```
/// use teleop_bridge::controller::input::{dpad_from_hat, DPAD_CENTER, DPAD_RIGHT, DPAD_UP};
///
/// assert_eq!(dpad_from_hat(0, 0), DPAD_CENTER);
/// assert_eq!(dpad_from_hat(1, 0), DPAD_RIGHT);
/// assert_eq!(dpad_from_hat(0, -1), DPAD_UP);
/// ```
#[must_use]
pub fn dpad_from_hat(x: i32, y: i32) -> f32 {
    match (x.signum(), y.signum()) {
        (0, 0) => DPAD_CENTER,
        (1, -1) => DPAD_UP_RIGHT,
        (1, 0) => DPAD_RIGHT,
        (1, 1) => DPAD_DOWN_RIGHT,
        (0, 1) => DPAD_DOWN,
        (-1, 1) => DPAD_DOWN_LEFT,
        (-1, 0) => DPAD_LEFT,
        (-1, -1) => DPAD_UP_LEFT,
        _ => DPAD_UP,
    }
}

fn clamp_stick(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

fn clamp_trigger(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
